//! Task model for the crawl orchestrator
//!
//! This module defines the unit of scheduled work:
//!
//! - `Task`: one fetch-and-process step with its priority and stage
//! - `TaskIdentity`: the canonical `METHOD address` key used by the ledger
//! - `TaskContext`: the key/value bag forwarded to descendant tasks
//! - `Stage` / `CrawlPass`: the state machines the tasks move through

mod context;
mod stage;

pub use context::TaskContext;
pub use stage::{CrawlPass, Stage, TIER_BASE, TIER_HIGH, TIER_LOW, TIER_MID, TIER_TOP};

use crate::url::{canonical_address, extract_host};
use std::fmt;
use url::Url;

/// Request method of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical key of a task: method plus canonical target address
///
/// Context is deliberately not part of the identity: two tasks for the same
/// address collide and are treated as the same task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskIdentity(String);

impl TaskIdentity {
    pub fn new(method: Method, url: &Url) -> Self {
        Self(format!("{} {}", method, canonical_address(url)))
    }

    /// Wraps an identity read back from storage
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of scheduled work
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Canonical key, derived from `method` and `url`
    pub identity: TaskIdentity,

    pub method: Method,

    /// The address to fetch
    pub url: Url,

    /// Selects the pipeline handler for the fetched result
    pub stage: Stage,

    /// Higher values are dispatched first
    pub priority: i32,

    /// Forwarded to descendant tasks
    pub context: TaskContext,
}

impl Task {
    /// Creates a GET task at the stage's first-page priority tier
    pub fn new(stage: Stage, url: Url, context: TaskContext) -> Self {
        Self {
            identity: TaskIdentity::new(Method::Get, &url),
            method: Method::Get,
            url,
            stage,
            priority: stage.priority(),
            context,
        }
    }

    /// Creates the "next page" continuation of a paginated stage
    pub fn continuation(stage: Stage, url: Url, context: TaskContext) -> Self {
        Self::new(stage, url, context).with_priority(stage.continuation_priority())
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self.identity = TaskIdentity::new(method, &self.url);
        self
    }

    pub fn pass(&self) -> CrawlPass {
        self.stage.pass()
    }

    /// Destination host used for request spacing
    pub fn host(&self) -> String {
        extract_host(&self.url)
    }
}
