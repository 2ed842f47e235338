//! Actor harvesting: profile → followees, followers and collections

use super::{context_str, empty_lists, next_page, record, CrawlContext};
use crate::crawler::FetchedPage;
use crate::extract::{ExtractError, Extraction};
use crate::task::{Stage, Task, TaskContext};
use crate::DeltaError;
use serde_json::Value;

const RELATIONS: [Stage; 3] = [Stage::Followees, Stage::Followers, Stage::Collections];

/// Creates the actor record and fans out to the three relation loops
pub(super) fn profile(
    ctx: &CrawlContext,
    task: &Task,
    _page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Vec<Task>, DeltaError> {
    let user_id = context_str(task, "user_id")?;
    let raw_id = task
        .context
        .get("user_id")
        .cloned()
        .unwrap_or_else(|| Value::String(user_id.clone()));

    let mut entries = vec![("_id", raw_id.clone())];
    entries.extend(empty_lists(&["followees", "followers", "collections"]));

    ctx.accumulator.create(
        ctx.collection(task.pass()),
        &user_id,
        &record(extraction, entries),
    )?;

    let context = TaskContext::new().with("user_id", raw_id);
    RELATIONS
        .iter()
        .map(|stage| -> Result<Task, DeltaError> {
            let template = ctx
                .config
                .templates
                .relation(*stage)
                .ok_or_else(|| ExtractError::InvalidAddress(format!("no template for {}", stage)))?;
            let url = ctx.render(template, &context, &[])?;
            Ok(Task::new(*stage, url, context.clone()))
        })
        .collect()
}

/// Appends one page of related ids and follows the "next" link
pub(super) fn relation(
    ctx: &CrawlContext,
    task: &Task,
    page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Vec<Task>, DeltaError> {
    let user_id = context_str(task, "user_id")?;
    let field = task
        .stage
        .relation_field()
        .ok_or_else(|| ExtractError::Selector(format!("{} is not a relation stage", task.stage)))?;

    ctx.extend(task, &user_id, field, &extraction.list("ids"))?;

    Ok(next_page(task, page, extraction)?.into_iter().collect())
}
