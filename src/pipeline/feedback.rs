//! Feedback harvesting: summary API → feedback pages → tagged feedback pages

use super::{context_str, empty_lists, next_page, record, CrawlContext};
use crate::crawler::FetchedPage;
use crate::extract::Extraction;
use crate::task::{Stage, Task, TaskContext};
use crate::url::encode_query_value;
use crate::DeltaError;
use serde_json::{json, Value};

/// Creates the feedback group and starts the paginated feedback loop
///
/// The tag names captured here travel with every feedback page task, so the
/// last page can fan out to the tagged pages without reading the group back.
pub(super) fn summary_api(
    ctx: &CrawlContext,
    task: &Task,
    _page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Vec<Task>, DeltaError> {
    let shop_id = context_str(task, "shop_id")?;

    let tags: Vec<Value> = extraction
        .tags
        .iter()
        .map(|tag| json!([tag.name, tag.count]))
        .collect();
    let recommend_cuisines = extraction
        .record
        .get("recommend_cuisines")
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    let mut entries = vec![
        ("_id", Value::String(shop_id.clone())),
        ("tags", Value::Array(tags)),
        ("recommend_cuisines", recommend_cuisines),
    ];
    entries.extend(empty_lists(&["reviews", "tagged_reviews"]));

    ctx.accumulator.create(
        ctx.collection(task.pass()),
        &shop_id,
        &record(extraction, entries),
    )?;

    let tag_names: Vec<&str> = extraction.tags.iter().map(|t| t.name.as_str()).collect();
    let context = TaskContext::new()
        .with("shop_id", shop_id)
        .with("tags", json!(tag_names));
    let url = ctx.render(&ctx.config.templates.feedback, &task.context, &[])?;

    Ok(vec![Task::new(Stage::FeedbackPage, url, context)])
}

/// Appends one page of feedback; the last page fans out per tag
pub(super) fn feedback_page(
    ctx: &CrawlContext,
    task: &Task,
    page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Vec<Task>, DeltaError> {
    let shop_id = context_str(task, "shop_id")?;
    ctx.extend(task, &shop_id, "reviews", &extraction.items)?;

    if let Some(next) = next_page(task, page, extraction)? {
        return Ok(vec![next]);
    }

    task.context
        .get_string_list("tags")
        .into_iter()
        .map(|tag| -> Result<Task, DeltaError> {
            let url = ctx.render(
                &ctx.config.templates.tagged_feedback,
                &task.context,
                &[("tag", encode_query_value(&tag))],
            )?;
            let context = TaskContext::new()
                .with("shop_id", shop_id.clone())
                .with("tag", tag);
            Ok(Task::new(Stage::TaggedFeedbackPage, url, context))
        })
        .collect()
}

/// Appends the feedback filed under one tag, each entry annotated with it
pub(super) fn tagged_feedback_page(
    ctx: &CrawlContext,
    task: &Task,
    _page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Vec<Task>, DeltaError> {
    let shop_id = context_str(task, "shop_id")?;
    let tag = context_str(task, "tag")?;

    let items: Vec<Value> = extraction
        .items
        .iter()
        .cloned()
        .map(|mut item| {
            if let Value::Object(fields) = &mut item {
                fields.insert("tag".to_string(), Value::String(tag.clone()));
            }
            item
        })
        .collect();

    ctx.extend(task, &shop_id, "tagged_reviews", &items)?;
    Ok(Vec::new())
}
