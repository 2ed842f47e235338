//! Extraction collaborator
//!
//! Turns a fetched body into structured data for the stage pipeline:
//! - `Extractor`: the pure, side-effect free interface the pipeline calls
//! - `SelectorExtractor`: CSS-selector / JSON-pointer implementation
//! - `StageSchema`: per-stage description of what to extract

mod rule;
mod schema;
mod selector;

pub use rule::{extract_int, FieldRule, Filter};
pub use schema::{default_schema, Format, StageSchema};
pub use selector::SelectorExtractor;

use crate::task::Stage;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while interpreting a fetched body
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid selector rule {0}")]
    Selector(String),

    #[error("Required field '{0}' missing")]
    MissingField(String),

    #[error("Task context lacks '{0}'")]
    MissingContext(String),

    #[error("Cannot build follow-up address: {0}")]
    InvalidAddress(String),

    #[error("No embedded HTML at '{0}'")]
    Embedded(String),

    #[error("Invalid JSON pointer '{0}'")]
    Pointer(String),
}

/// A tag captured from a summary response
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub count: i64,
}

/// Everything extracted from one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Links to follow, as found in the markup (possibly relative)
    pub links: Vec<String>,

    /// The "next page" link, if the page has one
    pub next: Option<String>,

    /// Record fields
    pub record: Map<String, Value>,

    /// Repeated items, each a JSON object
    pub items: Vec<Value>,

    pub tags: Vec<Tag>,
}

impl Extraction {
    /// Reads a record field holding a list
    pub fn list(&self, field: &str) -> Vec<Value> {
        match self.record.get(field) {
            Some(Value::Array(values)) => values.clone(),
            _ => Vec::new(),
        }
    }
}

/// Pure extraction interface, one implementation per source site
pub trait Extractor: Send + Sync {
    fn extract(&self, stage: Stage, body: &str) -> Result<Extraction, ExtractError>;
}
