//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::EntryStatus;
use crate::storage::{
    AppendOutcome, DocFilter, Document, InsertOutcome, LedgerEntry, RunRecord, RunStatus,
};
use crate::task::{CrawlPass, Stage};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Ledger entry not found: {0}")]
    EntryNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines every persistence operation the orchestrator needs. The
/// check-and-insert operations (`insert_ledger_entry`,
/// `insert_document_if_absent`) and `append_to_field` must each be atomic at
/// the single-row granularity, since several workers may target the same
/// identity or entity concurrently.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new run for a crawl pass
    ///
    /// # Arguments
    ///
    /// * `pass` - The crawl pass being run
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, pass: CrawlPass, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run of a crawl pass
    fn get_latest_run(&self, pass: CrawlPass) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Marks a run as completed with a finish timestamp
    fn complete_run(&mut self, run_id: i64) -> StorageResult<()>;

    // ===== Checkpoint Ledger =====

    /// Gets the ledger entry for a task identity
    fn get_ledger_entry(&self, identity: &str) -> StorageResult<Option<LedgerEntry>>;

    /// Inserts a ledger entry unless one already exists for its identity
    ///
    /// An existing entry is never modified.
    fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> StorageResult<InsertOutcome>;

    /// Marks an entry finished, inserting it first if it is unknown
    ///
    /// Idempotent: a second call leaves the entry (and its first
    /// `finished_at`) untouched.
    fn mark_finished(&mut self, entry: &LedgerEntry) -> StorageResult<()>;

    /// Records a failed attempt of an unfinished entry
    ///
    /// # Arguments
    ///
    /// * `identity` - The failed task's identity
    /// * `error` - Message stored as `last_error`
    /// * `max_attempts` - Attempts after which the entry is dead-lettered;
    ///   `0` never dead-letters
    ///
    /// # Returns
    ///
    /// The status of the entry after recording the failure
    fn record_failure(
        &mut self,
        identity: &str,
        error: &str,
        max_attempts: u32,
    ) -> StorageResult<EntryStatus>;

    /// Gets every unfinished, non-dead-lettered entry of a crawl pass
    ///
    /// Entries are ordered by priority (highest first), then admission order.
    fn get_pending_entries(&self, pass: CrawlPass) -> StorageResult<Vec<LedgerEntry>>;

    /// Returns dead-lettered entries of a pass to pending with a fresh attempt
    /// counter
    ///
    /// # Returns
    ///
    /// The number of revived entries
    fn revive_dead_letters(&mut self, pass: CrawlPass) -> StorageResult<usize>;

    // ===== Entity Documents =====

    /// Gets a document by collection and id
    fn get_document(&self, collection: &str, id: &str) -> StorageResult<Option<Document>>;

    /// Inserts a document unless one already exists with that id
    ///
    /// First writer wins; an existing document is never overwritten.
    fn insert_document_if_absent(
        &mut self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> StorageResult<InsertOutcome>;

    /// Atomically appends values to an array field of an existing document
    ///
    /// When `fragment` is given, the append is recorded under that key for the
    /// `(collection, id, field)` triple in the same transaction and a repeated
    /// append with the same key is skipped.
    fn append_to_field(
        &mut self,
        collection: &str,
        id: &str,
        field: &str,
        values: &[Value],
        fragment: Option<&str>,
    ) -> StorageResult<AppendOutcome>;

    /// Reads one batch of documents ordered by id
    ///
    /// Keyset pagination: pass the last id of the previous batch as
    /// `after_id` to continue from it.
    fn find_documents(
        &self,
        collection: &str,
        filter: &DocFilter,
        after_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<Document>>;

    // ===== Statistics =====

    /// Counts ledger entries of a pass in a given status
    fn count_ledger_entries(&self, pass: CrawlPass, status: EntryStatus) -> StorageResult<u64>;

    /// Gets total ledger entry count of a pass
    fn count_total_ledger_entries(&self, pass: CrawlPass) -> StorageResult<u64>;

    /// Counts pending entries per stage for a pass
    fn count_pending_by_stage(&self, pass: CrawlPass) -> StorageResult<Vec<(Stage, u64)>>;

    /// Counts documents in a collection
    fn count_documents(&self, collection: &str) -> StorageResult<u64>;
}
