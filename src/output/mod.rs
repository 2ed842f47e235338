//! Output module for crawl statistics
//!
//! Reports what the ledger and the record collections hold for a pass,
//! as shown by `--stats`.

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
