//! URL handling module for Delta-Crawl
//!
//! This module provides address validation and canonicalization for task
//! identities, destination host extraction for request spacing, and the
//! small template language used to build addresses from task context.

mod canonical;
mod host;
mod template;

pub use canonical::{canonical_address, join_address, last_path_segment, parse_address};
pub use host::extract_host;
pub use template::{encode_query_value, placeholders, render_template};
