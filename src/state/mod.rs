//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `EntryStatus`: where a ledger entry stands (pending, finished, dead-lettered)
//! - `HostState`: per-destination request spacing used by the scheduler

mod entry_status;
mod host_state;

pub use entry_status::EntryStatus;
pub use host_state::HostState;
