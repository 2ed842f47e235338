//! Stage pipeline
//!
//! Each crawl pass is a small state machine over `Stage`s. A fetched page is
//! first run through the extraction collaborator, then handed to the handler
//! of the task's stage, which may:
//! - write to an entity record through the accumulator
//! - return follow-up tasks carrying forwarded and augmented context
//!
//! Handlers are plain functions in a fixed table keyed by `Stage`. They
//! never submit tasks or touch the ledger themselves: the coordinator submits
//! the returned follow-ups and only then marks the originating task finished.

mod actor;
mod discovery;
mod feedback;
mod seed;

pub use seed::{for_each_seed, SeedCount};

use crate::accumulator::{Accumulator, ExtendOutcome};
use crate::config::Config;
use crate::crawler::FetchedPage;
use crate::extract::{ExtractError, Extraction, Extractor, SelectorExtractor};
use crate::storage::SharedStorage;
use crate::task::{CrawlPass, Stage, Task, TaskContext};
use crate::url::{join_address, parse_address, render_template};
use crate::DeltaError;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// A stage handler: interprets one extracted page and returns follow-ups
pub type StageHandler =
    fn(&CrawlContext, &Task, &FetchedPage, &Extraction) -> Result<Vec<Task>, DeltaError>;

/// The handler table
pub fn handler(stage: Stage) -> StageHandler {
    match stage {
        Stage::CityIndex => discovery::city_index,
        Stage::RegionIndex => discovery::region_index,
        Stage::Listing => discovery::listing,
        Stage::Detail => discovery::detail,
        Stage::SummaryApi => feedback::summary_api,
        Stage::FeedbackPage => feedback::feedback_page,
        Stage::TaggedFeedbackPage => feedback::tagged_feedback_page,
        Stage::Profile => actor::profile,
        Stage::Followees | Stage::Followers | Stage::Collections => actor::relation,
    }
}

/// Everything a handler may use, built once per run
pub struct CrawlContext {
    pub config: Arc<Config>,
    pub storage: SharedStorage,
    pub accumulator: Accumulator,
    pub extractor: Arc<dyn Extractor>,
}

impl CrawlContext {
    /// Builds the context with the configured selector extractor
    pub fn new(config: Arc<Config>, storage: SharedStorage) -> Result<Self, DeltaError> {
        let extractor = SelectorExtractor::new(&config.extract_overrides()?)?;
        Ok(Self::with_extractor(config, storage, Arc::new(extractor)))
    }

    pub fn with_extractor(
        config: Arc<Config>,
        storage: SharedStorage,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let accumulator = Accumulator::new(storage.clone(), config.accumulator.fragment_dedup);
        Self {
            config,
            storage,
            accumulator,
            extractor,
        }
    }

    /// Collection the given pass writes its records to
    pub fn collection(&self, pass: CrawlPass) -> &str {
        self.config.storage.collection_for(pass)
    }

    /// Renders an address template
    ///
    /// Placeholders are filled from the task context, then from `extra`,
    /// then from the crawler settings (`host`, `category_id`,
    /// `category_url_name`).
    pub fn render(
        &self,
        template: &str,
        context: &TaskContext,
        extra: &[(&str, String)],
    ) -> Result<Url, DeltaError> {
        let mut vars = context.template_vars();
        for (key, value) in extra {
            vars.insert(key.to_string(), value.clone());
        }

        let crawler = &self.config.crawler;
        vars.insert("host".to_string(), crawler.host_base().to_string());
        vars.entry("category_id".to_string())
            .or_insert_with(|| crawler.category_id.to_string());
        vars.entry("category_url_name".to_string())
            .or_insert_with(|| crawler.category_url_name.clone());

        let address = render_template(template, &vars)?;
        Ok(parse_address(&address)?)
    }

    /// Appends to a list field, treating a missing record as an error
    pub(crate) fn extend(
        &self,
        task: &Task,
        id: &str,
        field: &str,
        values: &[Value],
    ) -> Result<(), DeltaError> {
        let collection = self.collection(task.pass());
        match self
            .accumulator
            .extend(collection, id, field, values, &task.identity)?
        {
            ExtendOutcome::Appended(len) => {
                tracing::debug!(
                    "{}/{}.{} +{} (now {})",
                    collection,
                    id,
                    field,
                    values.len(),
                    len
                );
                Ok(())
            }
            ExtendOutcome::AlreadyApplied => Ok(()),
            ExtendOutcome::MissingEntity => Err(DeltaError::MissingEntity {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }
}

/// Runs fetched pages through extraction and the handler table
#[derive(Clone)]
pub struct Pipeline {
    ctx: Arc<CrawlContext>,
}

impl Pipeline {
    pub fn new(ctx: Arc<CrawlContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &CrawlContext {
        &self.ctx
    }

    /// Processes one fetched page, returning the follow-up tasks
    pub fn process(&self, task: &Task, page: &FetchedPage) -> Result<Vec<Task>, DeltaError> {
        let extraction = self.ctx.extractor.extract(task.stage, &page.body)?;
        handler(task.stage)(&self.ctx, task, page, &extraction)
    }
}

/// Reads a required context entry as text
pub(crate) fn context_str(task: &Task, key: &str) -> Result<String, ExtractError> {
    task.context
        .get_str(key)
        .ok_or_else(|| ExtractError::MissingContext(key.to_string()))
}

/// Resolves extracted links against the page they were found on
///
/// Links that do not resolve to a crawlable address are skipped.
pub(crate) fn resolve_links(page: &FetchedPage, links: &[String]) -> Vec<Url> {
    links
        .iter()
        .filter_map(|href| match join_address(&page.url, href) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::debug!("Skipping link {} on {}: {}", href, page.url, e);
                None
            }
        })
        .collect()
}

/// The continuation of a paginated stage, if the page has a "next" link
pub(crate) fn next_page(
    task: &Task,
    page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Option<Task>, DeltaError> {
    let Some(href) = extraction.next.as_deref() else {
        return Ok(None);
    };

    let url = join_address(&page.url, href)
        .map_err(|e| ExtractError::InvalidAddress(format!("next link '{}': {}", href, e)))?;
    Ok(Some(Task::continuation(task.stage, url, task.context.clone())))
}

/// Builds a record from the extracted fields plus fixed entries
pub(crate) fn record(extraction: &Extraction, entries: Vec<(&str, Value)>) -> Value {
    let mut body = extraction.record.clone();
    for (key, value) in entries {
        body.insert(key.to_string(), value);
    }
    Value::Object(body)
}

/// Empty list fields a record starts with
pub(crate) fn empty_lists(fields: &[&'static str]) -> Vec<(&'static str, Value)> {
    fields
        .iter()
        .map(|field| (*field, Value::Array(Vec::new())))
        .collect()
}
