//! Delta-Crawl: a resumable, multi-pass crawl orchestrator
//!
//! This crate ingests hierarchical content from a listing site in independent
//! crawl passes (entity discovery, feedback harvesting, actor harvesting).
//! Every task is recorded in a checkpoint ledger so an interrupted run picks up
//! exactly the work that was left unfinished, and entity records are assembled
//! incrementally across many fetches through an append-only accumulator.

pub mod accumulator;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod task;
pub mod url;

use thiserror::Error;

/// Main error type for Delta-Crawl operations
#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Extraction error: {0}")]
    Extract(#[from] extract::ExtractError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Entity {collection}/{id} does not exist yet")]
    MissingEntity { collection: String, id: String },

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl DeltaError {
    /// Returns true if the error must abort the run
    ///
    /// Once the ledger or the entity store has failed, the link between
    /// completed work and persisted output can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Database(_) | Self::Worker(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Unknown template placeholder '{placeholder}' in '{template}'")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("Unterminated placeholder in '{0}'")]
    UnterminatedPlaceholder(String),
}

/// Result type alias for Delta-Crawl operations
pub type Result<T> = std::result::Result<T, DeltaError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use accumulator::Accumulator;
pub use config::Config;
pub use ledger::{AdmitDecision, Ledger};
pub use task::{CrawlPass, Stage, Task, TaskContext, TaskIdentity};
