//! Entity discovery: city index → region index → listing → shop detail

use super::{context_str, next_page, record, resolve_links, CrawlContext};
use crate::crawler::FetchedPage;
use crate::extract::Extraction;
use crate::task::{Stage, Task};
use crate::url::last_path_segment;
use crate::DeltaError;
use serde_json::{json, Value};

/// Forwards every link as a task of the next stage with the same context
fn forward(page: &FetchedPage, task: &Task, extraction: &Extraction, stage: Stage) -> Vec<Task> {
    resolve_links(page, &extraction.links)
        .into_iter()
        .map(|url| Task::new(stage, url, task.context.clone()))
        .collect()
}

pub(super) fn city_index(
    _ctx: &CrawlContext,
    task: &Task,
    page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Vec<Task>, DeltaError> {
    Ok(forward(page, task, extraction, Stage::RegionIndex))
}

pub(super) fn region_index(
    _ctx: &CrawlContext,
    task: &Task,
    page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Vec<Task>, DeltaError> {
    Ok(forward(page, task, extraction, Stage::Listing))
}

/// Emits one detail task per shop link, then the next listing page
pub(super) fn listing(
    _ctx: &CrawlContext,
    task: &Task,
    page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Vec<Task>, DeltaError> {
    let mut follow_ups: Vec<Task> = resolve_links(page, &extraction.links)
        .into_iter()
        .filter_map(|url| {
            let shop_id = last_path_segment(&url)?;
            let context = task.context.clone().with("shop_id", shop_id);
            Some(Task::new(Stage::Detail, url, context))
        })
        .collect();

    follow_ups.extend(next_page(task, page, extraction)?);
    Ok(follow_ups)
}

/// Creates the shop record
///
/// The record keeps its address and city metadata so the feedback pass can
/// build summary requests without revisiting the listing.
pub(super) fn detail(
    ctx: &CrawlContext,
    task: &Task,
    _page: &FetchedPage,
    extraction: &Extraction,
) -> Result<Vec<Task>, DeltaError> {
    let shop_id = context_str(task, "shop_id")?;
    let crawler = &ctx.config.crawler;

    let meta = json!({
        "city_id": task.context.get("city_id").cloned().unwrap_or(Value::Null),
        "city_name": task.context.get("city_name").cloned().unwrap_or(Value::Null),
        "category_id": crawler.category_id,
        "category_url_name": crawler.category_url_name,
    });
    let body = record(
        extraction,
        vec![
            ("_id", Value::String(shop_id.clone())),
            ("url", Value::String(task.url.to_string())),
            ("meta", meta),
        ],
    );

    ctx.accumulator
        .create(ctx.collection(task.pass()), &shop_id, &body)?;
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, run};
    use super::*;
    use crate::task::{TaskContext, TIER_HIGH, TIER_MID, TIER_TOP};
    use url::Url;

    fn task(stage: Stage, url: &str, context: TaskContext) -> Task {
        Task::new(stage, Url::parse(url).unwrap(), context)
    }

    fn city() -> TaskContext {
        TaskContext::new().with("city_id", 2).with("city_name", "beijing")
    }

    #[test]
    fn test_city_index_forwards_regions() {
        let ctx = context();
        let index = task(
            Stage::CityIndex,
            "http://www.dianping.com/search/category/2/10",
            city(),
        );
        let html = r#"<div id="classfy">
            <a href="/search/category/2/10/g110">a</a>
            <a href="/search/category/2/10/g111">b</a>
        </div>"#;

        let follow_ups = run(&ctx, &index, html).unwrap();
        assert_eq!(follow_ups.len(), 2);
        assert!(follow_ups.iter().all(|t| t.stage == Stage::RegionIndex));
        assert!(follow_ups.iter().all(|t| t.priority == TIER_TOP));
        assert!(follow_ups.iter().all(|t| t.context == city()));
        assert_eq!(
            follow_ups[0].url.as_str(),
            "http://www.dianping.com/search/category/2/10/g110"
        );
    }

    #[test]
    fn test_listing_emits_details_and_next() {
        let ctx = context();
        let listing = task(
            Stage::Listing,
            "http://www.dianping.com/search/category/2/10/g110r1",
            city(),
        );
        let html = r#"<div id="shop-all-list"><ul>
            <li><div class="pic"><a href="/shop/38230595">a</a></div></li>
            <li><div class="pic"><a href="/shop/5003">b</a></div></li>
        </ul></div>
        <a class="next" href="/search/category/2/10/g110r1p2">next</a>"#;

        let follow_ups = run(&ctx, &listing, html).unwrap();
        assert_eq!(follow_ups.len(), 3);

        let details: Vec<&Task> = follow_ups
            .iter()
            .filter(|t| t.stage == Stage::Detail)
            .collect();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].context.get_str("shop_id").unwrap(), "38230595");
        assert_eq!(details[0].context.get_str("city_name").unwrap(), "beijing");
        assert_eq!(details[0].priority, TIER_MID);

        let next = follow_ups.iter().find(|t| t.stage == Stage::Listing).unwrap();
        assert_eq!(next.priority, TIER_HIGH);
        assert!(next.url.path().ends_with("p2"));
    }

    #[test]
    fn test_last_listing_page_has_no_continuation() {
        let ctx = context();
        let listing = task(
            Stage::Listing,
            "http://www.dianping.com/search/category/2/10/g110r1p2",
            city(),
        );
        let html = r#"<div id="shop-all-list"><ul>
            <li><div class="pic"><a href="/shop/7">a</a></div></li>
        </ul></div>"#;

        let follow_ups = run(&ctx, &listing, html).unwrap();
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].stage, Stage::Detail);
    }

    #[test]
    fn test_detail_creates_shop_once() {
        let ctx = context();
        let detail = task(
            Stage::Detail,
            "http://www.dianping.com/shop/38230595",
            city().with("shop_id", "38230595"),
        );
        let html = r#"<div id="basic-info">
            <h1 class="shop-name">Lao Beijing</h1>
            <div class="address"><span class="item">Wangfujing 1</span></div>
        </div>"#;

        assert!(run(&ctx, &detail, html).unwrap().is_empty());

        let shop = ctx.accumulator.get("shops", "38230595").unwrap().unwrap();
        assert_eq!(shop.body["name"], json!("Lao Beijing"));
        assert_eq!(shop.body["url"], json!("http://www.dianping.com/shop/38230595"));
        assert_eq!(shop.body["meta"]["city_id"], json!(2));
        assert_eq!(shop.body["meta"]["category_url_name"], json!("food"));

        let renamed = html.replace("Lao Beijing", "Someone Else");
        run(&ctx, &detail, &renamed).unwrap();
        let shop = ctx.accumulator.get("shops", "38230595").unwrap().unwrap();
        assert_eq!(shop.body["name"], json!("Lao Beijing"));
    }

    #[test]
    fn test_detail_without_shop_id_fails() {
        let ctx = context();
        let detail = task(Stage::Detail, "http://www.dianping.com/shop/1", city());
        let html = r#"<div id="basic-info"><h1 class="shop-name">x</h1></div>"#;
        assert!(matches!(
            run(&ctx, &detail, html),
            Err(DeltaError::Extract(_))
        ));
    }
}
