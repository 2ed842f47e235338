//! Crawler module for task dispatch
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with session headers, cookies and proxy rotation
//! - The task frontier with ledger admission and per-host spacing
//! - Overall crawl coordination

mod coordinator;
mod fetcher;
mod scheduler;

pub use coordinator::{run_crawl, Coordinator, RunSummary, SeedReport, ShutdownHandle};
pub use fetcher::{build_http_client, FetchError, FetchRequest, FetchedPage, Fetcher, HttpFetcher};
pub use scheduler::{Dispatch, Frontier, QueuedTask};
