//! Storage module for persisting crawl state
//!
//! This module handles all database operations for the orchestrator, including:
//! - SQLite database initialization and schema management
//! - The checkpoint ledger (one row per task identity ever admitted)
//! - Entity documents and their accumulating fields
//! - The fragment ledger used to make appends idempotent
//! - Run tracking and resumption support

mod cursor;
mod schema;
mod sqlite;
mod traits;

pub use cursor::DocumentCursor;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::EntryStatus;
use crate::task::{CrawlPass, Method, Stage, Task, TaskContext, TaskIdentity};
use crate::DeltaError;

use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

/// Storage handle shared between the ledger, the accumulator and the workers
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage, DeltaError> {
    SqliteStorage::new(path)
}

/// Wraps a storage backend for sharing across workers
pub fn shared(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks the shared storage
///
/// A poisoned lock means a writer panicked mid-operation, which is reported as
/// a storage failure rather than a panic in the caller.
pub fn lock_storage(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage
        .lock()
        .map_err(|_| StorageError::Database("storage lock poisoned".to_string()))
}

/// Represents a ledger entry in the database
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub identity: String,
    pub pass: CrawlPass,
    pub stage: Stage,
    pub method: Method,
    pub url: String,
    pub priority: i32,
    pub context: TaskContext,
    pub finished: bool,
    pub attempts: u32,
    pub dead_lettered: bool,
    pub last_error: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

impl LedgerEntry {
    /// Builds a fresh, unfinished entry shadowing a task
    pub fn from_task(task: &Task) -> Self {
        Self {
            identity: task.identity.as_str().to_string(),
            pass: task.pass(),
            stage: task.stage,
            method: task.method,
            url: task.url.to_string(),
            priority: task.priority,
            context: task.context.clone(),
            finished: false,
            attempts: 0,
            dead_lettered: false,
            last_error: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            finished_at: None,
        }
    }

    /// Rebuilds the dispatchable task exactly as it was admitted
    pub fn to_task(&self) -> StorageResult<Task> {
        let url = Url::parse(&self.url).map_err(|e| {
            StorageError::Serialization(format!("ledger entry {}: {}", self.identity, e))
        })?;
        Ok(Task {
            identity: TaskIdentity::from_raw(self.identity.clone()),
            method: self.method,
            url,
            stage: self.stage,
            priority: self.priority,
            context: self.context.clone(),
        })
    }

    pub fn status(&self) -> EntryStatus {
        EntryStatus::from_flags(self.finished, self.dead_lettered)
    }
}

/// Result of a check-and-insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Result of an atomic append to an accumulating field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The values were appended; holds the new length of the field
    Applied(usize),

    /// The fragment key was already recorded for this field; nothing changed
    AlreadyApplied,

    /// No document with that id exists in the collection
    Missing,
}

/// Represents an entity document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub body: Value,
    pub created_at: String,
}

impl Document {
    /// Reads a top-level field of the body
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }
}

/// Selects documents for `find_documents`
#[derive(Debug, Clone, PartialEq)]
pub enum DocFilter {
    All,

    /// Matches documents whose field at a dotted path (e.g. `meta.city_id`)
    /// equals a scalar value
    FieldEquals { path: String, value: Value },
}

impl DocFilter {
    pub fn field_equals(path: &str, value: impl Into<Value>) -> Self {
        Self::FieldEquals {
            path: path.to_string(),
            value: value.into(),
        }
    }
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub pass: CrawlPass,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Failed,
        ] {
            let db_str = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_ledger_entry_restores_task() {
        let task = Task::continuation(
            Stage::Listing,
            Url::parse("http://example.com/search/category/2/10/r1p2").unwrap(),
            TaskContext::new().with("city_id", 2),
        );
        let entry = LedgerEntry::from_task(&task);

        assert_eq!(entry.pass, CrawlPass::Discovery);
        assert_eq!(entry.status(), EntryStatus::Pending);
        assert_eq!(entry.to_task().unwrap(), task);
    }

    #[test]
    fn test_ledger_entry_bad_url() {
        let task = Task::new(
            Stage::Detail,
            Url::parse("http://example.com/shop/1").unwrap(),
            TaskContext::new(),
        );
        let mut entry = LedgerEntry::from_task(&task);
        entry.url = "not a url".to_string();
        assert!(matches!(
            entry.to_task(),
            Err(StorageError::Serialization(_))
        ));
    }
}
