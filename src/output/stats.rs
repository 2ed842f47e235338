//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! ledger and record statistics from the storage layer.

use crate::config::StorageConfig;
use crate::state::EntryStatus;
use crate::storage::{RunRecord, Storage};
use crate::task::{CrawlPass, Stage};
use crate::DeltaError;
use std::collections::HashMap;

/// Crawl statistics of one pass
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub pass: CrawlPass,

    /// Most recent run of the pass, if any
    pub latest_run: Option<RunRecord>,

    /// Total number of ledger entries of the pass
    pub total_entries: u64,

    /// Count of ledger entries by status
    pub entries_by_status: HashMap<EntryStatus, u64>,

    /// Unfinished entries per stage, highest priority first
    pub pending_by_stage: Vec<(Stage, u64)>,

    /// Record counts per collection
    pub documents: Vec<(String, u64)>,
}

impl CrawlStatistics {
    pub fn count(&self, status: EntryStatus) -> u64 {
        self.entries_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `pass` - The pass whose ledger entries are counted
/// * `collections` - Names of the record collections to count
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(DeltaError)` - Failed to query statistics
pub fn load_statistics(
    storage: &dyn Storage,
    pass: CrawlPass,
    collections: &StorageConfig,
) -> Result<CrawlStatistics, DeltaError> {
    let total_entries = storage.count_total_ledger_entries(pass)?;

    let mut entries_by_status = HashMap::new();
    for status in EntryStatus::all_states() {
        let count = storage.count_ledger_entries(pass, status)?;
        if count > 0 {
            entries_by_status.insert(status, count);
        }
    }

    let documents = CrawlPass::all()
        .into_iter()
        .map(|p| {
            let name = collections.collection_for(p);
            Ok((name.to_string(), storage.count_documents(name)?))
        })
        .collect::<Result<Vec<_>, DeltaError>>()?;

    Ok(CrawlStatistics {
        pass,
        latest_run: storage.get_latest_run(pass)?,
        total_entries,
        entries_by_status,
        pending_by_stage: storage.count_pending_by_stage(pass)?,
        documents,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ({} pass) ===\n", stats.pass);

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run:");
            println!("  Id: {}", run.id);
            println!("  Status: {}", run.status.to_db_string());
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
        }
        None => println!("No runs recorded"),
    }
    println!();

    println!("Ledger:");
    println!("  Total entries: {}", stats.total_entries);
    for status in EntryStatus::all_states() {
        let count = stats.count(status);
        let percentage = if stats.total_entries > 0 {
            (count as f64 / stats.total_entries as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.pending_by_stage.is_empty() {
        println!("Unfinished by Stage:");
        for (stage, count) in &stats.pending_by_stage {
            println!("  {}: {}", stage, count);
        }
        println!();
    }

    println!("Records:");
    for (collection, count) in &stats.documents {
        println!("  {}: {}", collection, count);
    }
}
