//! Configuration module for Delta-Crawl
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use delta_crawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("delta.toml")).unwrap();
//! println!("Crawler will use {} workers", config.crawler.workers);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    AccumulatorConfig, CityEntry, Config, CrawlerConfig, SessionConfig, StorageConfig,
    TemplateConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate_for_pass;
