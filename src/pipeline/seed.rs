//! Initial tasks of each crawl pass
//!
//! Discovery starts from the configured cities. The later passes start from
//! the records an earlier pass produced, read lazily in id order so a large
//! collection never has to be held in memory.

use super::CrawlContext;
use crate::storage::{DocFilter, Document, DocumentCursor};
use crate::task::{CrawlPass, Stage, Task, TaskContext};
use crate::DeltaError;
use serde_json::Value;

/// How many seed tasks a pass produced and how many were queued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedCount {
    pub produced: usize,
    pub queued: usize,
}

/// Produces the seed tasks of a pass, handing each to `submit`
///
/// `submit` returns whether the task was queued; seeds for work that is
/// already finished are produced anyway and dropped by admission.
pub fn for_each_seed<F>(
    ctx: &CrawlContext,
    pass: CrawlPass,
    mut submit: F,
) -> Result<SeedCount, DeltaError>
where
    F: FnMut(Task) -> Result<bool, DeltaError>,
{
    let mut count = SeedCount::default();
    let mut emit = |task: Task| -> Result<(), DeltaError> {
        count.produced += 1;
        if submit(task)? {
            count.queued += 1;
        }
        Ok(())
    };

    match pass {
        CrawlPass::Discovery => {
            for city in &ctx.config.cities {
                let context = TaskContext::new()
                    .with("city_id", city.id)
                    .with("city_name", city.name.clone());
                let url = ctx.render(&ctx.config.templates.city_index, &context, &[])?;
                emit(Task::new(Stage::CityIndex, url, context))?;
            }
        }
        CrawlPass::Feedback => {
            let shops = ctx.collection(CrawlPass::Discovery);
            for doc in DocumentCursor::new(ctx.storage.clone(), shops, DocFilter::All) {
                if let Some(task) = summary_seed(ctx, &doc?)? {
                    emit(task)?;
                }
            }
        }
        CrawlPass::Actor => {
            let groups = ctx.collection(CrawlPass::Feedback);
            for doc in DocumentCursor::new(ctx.storage.clone(), groups, DocFilter::All) {
                for task in profile_seeds(ctx, &doc?)? {
                    emit(task)?;
                }
            }
        }
    }

    Ok(count)
}

/// The summary request of one shop
fn summary_seed(ctx: &CrawlContext, shop: &Document) -> Result<Option<Task>, DeltaError> {
    let Some(shop_url) = shop.field("url").and_then(Value::as_str) else {
        tracing::warn!("Shop {} has no url, skipping", shop.id);
        return Ok(None);
    };

    let context = TaskContext::new()
        .with("shop_id", shop.id.clone())
        .with("shop_url", shop_url);

    let mut extra = Vec::new();
    if let Some(Value::Object(meta)) = shop.field("meta") {
        for (key, value) in meta {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            extra.push((key.as_str(), text));
        }
    }

    let url = ctx.render(&ctx.config.templates.summary_api, &context, &extra)?;
    Ok(Some(Task::new(Stage::SummaryApi, url, context)))
}

/// One profile request per author in a feedback group
fn profile_seeds(ctx: &CrawlContext, group: &Document) -> Result<Vec<Task>, DeltaError> {
    let Some(Value::Array(reviews)) = group.field("reviews") else {
        return Ok(Vec::new());
    };

    reviews
        .iter()
        .filter_map(|review| review.get("user_id"))
        .filter(|user_id| user_id.is_number() || user_id.is_string())
        .map(|user_id| -> Result<Task, DeltaError> {
            let context = TaskContext::new().with("user_id", user_id.clone());
            let url = ctx.render(&ctx.config.templates.profile, &context, &[])?;
            Ok(Task::new(Stage::Profile, url, context))
        })
        .collect()
}
