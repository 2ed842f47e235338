//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::EntryStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    AppendOutcome, DocFilter, Document, InsertOutcome, LedgerEntry, RunRecord, RunStatus,
};
use crate::task::{CrawlPass, Method, Stage, TaskContext};
use crate::DeltaError;
use chrono::Utc;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;

const LEDGER_COLUMNS: &str = "identity, pass, stage, method, url, priority, context, finished, \
     attempts, dead_lettered, last_error, created_at, finished_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(DeltaError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, DeltaError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    ///
    /// Used by tests and by `--dry-run`, which must not touch the real ledger.
    pub fn new_in_memory() -> Result<Self, DeltaError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn row_to_ledger_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let pass: String = row.get(1)?;
    let stage: String = row.get(2)?;
    let method: String = row.get(3)?;
    let context: String = row.get(6)?;

    Ok(LedgerEntry {
        identity: row.get(0)?,
        pass: CrawlPass::from_db_string(&pass)
            .ok_or_else(|| conversion_error(1, format!("unknown pass '{}'", pass)))?,
        stage: Stage::from_db_string(&stage)
            .ok_or_else(|| conversion_error(2, format!("unknown stage '{}'", stage)))?,
        method: Method::from_db_string(&method)
            .ok_or_else(|| conversion_error(3, format!("unknown method '{}'", method)))?,
        url: row.get(4)?,
        priority: row.get(5)?,
        context: TaskContext::from_json(&context)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        finished: row.get(7)?,
        attempts: row.get(8)?,
        dead_lettered: row.get(9)?,
        last_error: row.get(10)?,
        created_at: row.get(11)?,
        finished_at: row.get(12)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let pass: String = row.get(1)?;
    Ok(RunRecord {
        id: row.get(0)?,
        pass: CrawlPass::from_db_string(&pass)
            .ok_or_else(|| conversion_error(1, format!("unknown pass '{}'", pass)))?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
            .unwrap_or(RunStatus::Running),
    })
}

/// Converts a scalar JSON value into a bindable parameter
///
/// Booleans bind as 0/1, matching what `json_extract` yields for them.
fn scalar_param(value: &Value) -> StorageResult<Box<dyn ToSql>> {
    match value {
        Value::String(s) => Ok(Box::new(s.clone())),
        Value::Bool(b) => Ok(Box::new(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Box::new(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Box::new(f))
            } else {
                Err(StorageError::ConstraintViolation(format!(
                    "unsupported filter number {}",
                    n
                )))
            }
        }
        other => Err(StorageError::ConstraintViolation(format!(
            "document filters compare scalars only, got {}",
            other
        ))),
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, pass: CrawlPass, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (pass, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                pass.to_db_string(),
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, pass, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                row_to_run,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self, pass: CrawlPass) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, pass, started_at, finished_at, config_hash, status FROM runs
                 WHERE pass = ?1 ORDER BY id DESC LIMIT 1",
                params![pass.to_db_string()],
                row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let finished_at = (status != RunStatus::Running).then_some(now);
        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), finished_at, run_id],
        )?;
        Ok(())
    }

    fn complete_run(&mut self, run_id: i64) -> StorageResult<()> {
        self.update_run_status(run_id, RunStatus::Completed)
    }

    // ===== Checkpoint Ledger =====

    fn get_ledger_entry(&self, identity: &str) -> StorageResult<Option<LedgerEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {} FROM ledger WHERE identity = ?1", LEDGER_COLUMNS),
                params![identity],
                row_to_ledger_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> StorageResult<InsertOutcome> {
        let inserted = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO ledger ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                LEDGER_COLUMNS
            ),
            params![
                entry.identity,
                entry.pass.to_db_string(),
                entry.stage.to_db_string(),
                entry.method.as_str(),
                entry.url,
                entry.priority,
                entry.context.to_json()?,
                entry.finished,
                entry.attempts,
                entry.dead_lettered,
                entry.last_error,
                entry.created_at,
                entry.finished_at,
            ],
        )?;

        Ok(if inserted == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }

    fn mark_finished(&mut self, entry: &LedgerEntry) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            &format!(
                "INSERT INTO ledger ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, 0, 0, NULL, ?8, ?9)
                 ON CONFLICT(identity) DO UPDATE SET
                    finished = 1,
                    finished_at = COALESCE(ledger.finished_at, excluded.finished_at)",
                LEDGER_COLUMNS
            ),
            params![
                entry.identity,
                entry.pass.to_db_string(),
                entry.stage.to_db_string(),
                entry.method.as_str(),
                entry.url,
                entry.priority,
                entry.context.to_json()?,
                entry.created_at,
                now,
            ],
        )?;
        Ok(())
    }

    fn record_failure(
        &mut self,
        identity: &str,
        error: &str,
        max_attempts: u32,
    ) -> StorageResult<EntryStatus> {
        let current: Option<(u32, bool)> = self
            .conn
            .query_row(
                "SELECT attempts, finished FROM ledger WHERE identity = ?1",
                params![identity],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (attempts, finished) =
            current.ok_or_else(|| StorageError::EntryNotFound(identity.to_string()))?;

        if finished {
            return Ok(EntryStatus::Finished);
        }

        let attempts = attempts.saturating_add(1);
        let dead_lettered = max_attempts > 0 && attempts >= max_attempts;

        self.conn.execute(
            "UPDATE ledger SET attempts = ?1, last_error = ?2, dead_lettered = ?3 WHERE identity = ?4",
            params![attempts, error, dead_lettered, identity],
        )?;

        Ok(EntryStatus::from_flags(false, dead_lettered))
    }

    fn get_pending_entries(&self, pass: CrawlPass) -> StorageResult<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM ledger
             WHERE pass = ?1 AND finished = 0 AND dead_lettered = 0
             ORDER BY priority DESC, rowid ASC",
            LEDGER_COLUMNS
        ))?;

        let entries = stmt
            .query_map(params![pass.to_db_string()], row_to_ledger_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn revive_dead_letters(&mut self, pass: CrawlPass) -> StorageResult<usize> {
        let revived = self.conn.execute(
            "UPDATE ledger SET dead_lettered = 0, attempts = 0
             WHERE pass = ?1 AND finished = 0 AND dead_lettered = 1",
            params![pass.to_db_string()],
        )?;
        Ok(revived)
    }

    // ===== Entity Documents =====

    fn get_document(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        let raw: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT body, created_at FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match raw {
            Some((body, created_at)) => Ok(Some(Document {
                collection: collection.to_string(),
                id: id.to_string(),
                body: serde_json::from_str(&body)?,
                created_at,
            })),
            None => Ok(None),
        }
    }

    fn insert_document_if_absent(
        &mut self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> StorageResult<InsertOutcome> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO documents (collection, id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, serde_json::to_string(body)?, now],
        )?;

        Ok(if inserted == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }

    fn append_to_field(
        &mut self,
        collection: &str,
        id: &str,
        field: &str,
        values: &[Value],
        fragment: Option<&str>,
    ) -> StorageResult<AppendOutcome> {
        // Dropping the transaction without commit rolls it back
        let tx = self.conn.transaction()?;

        let body: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(body) = body else {
            return Ok(AppendOutcome::Missing);
        };

        if let Some(fragment) = fragment {
            let recorded = tx.execute(
                "INSERT OR IGNORE INTO fragments (collection, id, field, fragment, applied_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![collection, id, field, fragment, Utc::now().to_rfc3339()],
            )?;
            if recorded == 0 {
                return Ok(AppendOutcome::AlreadyApplied);
            }
        }

        let mut doc: Value = serde_json::from_str(&body)?;
        let object = doc.as_object_mut().ok_or_else(|| {
            StorageError::ConstraintViolation(format!(
                "document {}/{} is not an object",
                collection, id
            ))
        })?;
        let array = object
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| {
                StorageError::ConstraintViolation(format!(
                    "field '{}' of {}/{} is not an array",
                    field, collection, id
                ))
            })?;
        array.extend(values.iter().cloned());
        let len = array.len();

        tx.execute(
            "UPDATE documents SET body = ?1 WHERE collection = ?2 AND id = ?3",
            params![serde_json::to_string(&doc)?, collection, id],
        )?;
        tx.commit()?;

        Ok(AppendOutcome::Applied(len))
    }

    fn find_documents(
        &self,
        collection: &str,
        filter: &DocFilter,
        after_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<Document>> {
        let mut sql =
            String::from("SELECT id, body, created_at FROM documents WHERE collection = ?1");
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(collection.to_string())];

        if let Some(after_id) = after_id {
            args.push(Box::new(after_id.to_string()));
            sql.push_str(&format!(" AND id > ?{}", args.len()));
        }

        if let DocFilter::FieldEquals { path, value } = filter {
            args.push(Box::new(format!("$.{}", path)));
            let path_index = args.len();
            args.push(scalar_param(value)?);
            sql.push_str(&format!(
                " AND json_extract(body, ?{}) = ?{}",
                path_index,
                args.len()
            ));
        }

        args.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY id LIMIT ?{}", args.len()));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, body, created_at)| {
                Ok(Document {
                    collection: collection.to_string(),
                    id,
                    body: serde_json::from_str(&body)?,
                    created_at,
                })
            })
            .collect()
    }

    // ===== Statistics =====

    fn count_ledger_entries(&self, pass: CrawlPass, status: EntryStatus) -> StorageResult<u64> {
        let condition = match status {
            EntryStatus::Pending => "finished = 0 AND dead_lettered = 0",
            EntryStatus::Finished => "finished = 1",
            EntryStatus::DeadLettered => "finished = 0 AND dead_lettered = 1",
        };
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM ledger WHERE pass = ?1 AND {}",
                condition
            ),
            params![pass.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_total_ledger_entries(&self, pass: CrawlPass) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger WHERE pass = ?1",
            params![pass.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_pending_by_stage(&self, pass: CrawlPass) -> StorageResult<Vec<(Stage, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT stage, COUNT(*) FROM ledger
             WHERE pass = ?1 AND finished = 0 AND dead_lettered = 0
             GROUP BY stage",
        )?;

        let rows = stmt
            .query_map(params![pass.to_db_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts: Vec<(Stage, u64)> = rows
            .into_iter()
            .filter_map(|(stage, count)| {
                Stage::from_db_string(&stage).map(|stage| (stage, count as u64))
            })
            .collect();
        counts.sort_by_key(|(stage, _)| std::cmp::Reverse(stage.priority()));

        Ok(counts)
    }

    fn count_documents(&self, collection: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
