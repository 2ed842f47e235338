//! Checkpoint ledger
//!
//! The ledger is the resumability foundation of the orchestrator: every task
//! is recorded under its identity when it is first admitted, and marked
//! finished once its pipeline handler has run and its follow-ups have been
//! submitted. Entries are never deleted, and `finished` only ever goes from
//! false to true.

use crate::state::EntryStatus;
use crate::storage::{
    lock_storage, InsertOutcome, LedgerEntry, SharedStorage, Storage, StorageResult,
};
use crate::task::{CrawlPass, Task};
use tracing::{debug, error};

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    /// New or still unfinished; the task should be queued
    Proceed,

    /// Already finished (or dead-lettered); the task must not be queued
    Skip,
}

/// Persisted record of task identity to completion state
#[derive(Clone)]
pub struct Ledger {
    storage: SharedStorage,
    max_attempts: u32,
}

impl Ledger {
    /// Creates a ledger over shared storage
    ///
    /// `max_attempts` is the number of failed attempts after which an entry is
    /// dead-lettered; `0` retries forever.
    pub fn new(storage: SharedStorage, max_attempts: u32) -> Self {
        Self {
            storage,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether a submitted task should be queued
    ///
    /// Unknown identities are inserted unfinished and proceed. Unfinished
    /// entries proceed again, which is how an interrupted task is retried.
    /// Finished entries are skipped. A concurrent insert of the same identity
    /// is treated as a skip.
    pub fn admit(&self, task: &Task) -> StorageResult<AdmitDecision> {
        let mut storage = lock_storage(&self.storage)?;

        match storage.get_ledger_entry(task.identity.as_str())? {
            Some(entry) if entry.finished => {
                debug!("Skipping finished task {}", task.identity);
                Ok(AdmitDecision::Skip)
            }
            Some(entry) if entry.dead_lettered => {
                debug!(
                    "Skipping dead-lettered task {} ({} attempts)",
                    task.identity, entry.attempts
                );
                Ok(AdmitDecision::Skip)
            }
            Some(_) => {
                debug!("Re-admitting unfinished task {}", task.identity);
                Ok(AdmitDecision::Proceed)
            }
            None => match storage.insert_ledger_entry(&LedgerEntry::from_task(task))? {
                InsertOutcome::Inserted => Ok(AdmitDecision::Proceed),
                InsertOutcome::AlreadyExists => {
                    debug!("Lost admission race for {}", task.identity);
                    Ok(AdmitDecision::Skip)
                }
            },
        }
    }

    /// Marks a task finished; safe to call more than once
    pub fn complete(&self, task: &Task) -> StorageResult<()> {
        let mut storage = lock_storage(&self.storage)?;
        storage.mark_finished(&LedgerEntry::from_task(task))
    }

    /// Loads every unfinished task of a pass, highest priority first
    ///
    /// Tasks come back with the identity, stage, priority and context they
    /// were admitted with.
    pub fn pending(&self, pass: CrawlPass) -> StorageResult<Vec<Task>> {
        let storage = lock_storage(&self.storage)?;
        storage
            .get_pending_entries(pass)?
            .iter()
            .map(LedgerEntry::to_task)
            .collect()
    }

    /// Records a failed attempt; the task stays unfinished
    ///
    /// Returns `EntryStatus::DeadLettered` once the attempt cap is reached.
    pub fn record_failure(&self, task: &Task, error: &str) -> StorageResult<EntryStatus> {
        let mut storage = lock_storage(&self.storage)?;
        let status = storage.record_failure(task.identity.as_str(), error, self.max_attempts)?;
        if status == EntryStatus::DeadLettered {
            error!(
                "Task {} reached {} attempts and was dead-lettered",
                task.identity, self.max_attempts
            );
        }
        Ok(status)
    }

    /// Returns every dead-lettered entry of a pass to pending
    pub fn revive_dead_letters(&self, pass: CrawlPass) -> StorageResult<usize> {
        let mut storage = lock_storage(&self.storage)?;
        storage.revive_dead_letters(pass)
    }

    /// Looks up the status of an identity, if it was ever admitted
    pub fn status(&self, task: &Task) -> StorageResult<Option<EntryStatus>> {
        let storage = lock_storage(&self.storage)?;
        Ok(storage
            .get_ledger_entry(task.identity.as_str())?
            .map(|entry| entry.status()))
    }
}
