//! Integration tests for the stage pipelines
//!
//! These tests drive whole passes through the coordinator with an in-memory
//! fetcher, checking dispatch order, resume behavior and the records each
//! pass assembles.

use async_trait::async_trait;
use delta_crawl::config::parse_config;
use delta_crawl::crawler::{Coordinator, FetchError, FetchRequest, FetchedPage, Fetcher, RunSummary};
use delta_crawl::state::EntryStatus;
use delta_crawl::storage::{shared, RunStatus, SharedStorage, SqliteStorage, Storage};
use delta_crawl::{Accumulator, CrawlPass};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const HOST: &str = "http://www.dianping.com";

/// Serves canned bodies by path and query, falling back to the bare path
#[derive(Default)]
struct MockFetcher {
    pages: HashMap<String, String>,
    log: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn page(mut self, key: &str, body: impl Into<String>) -> Self {
        self.pages.insert(key.to_string(), body.into());
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn position(&self, key: &str) -> usize {
        self.fetched()
            .iter()
            .position(|k| k == key)
            .unwrap_or_else(|| panic!("{} was never fetched", key))
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
        let path = request.url.path().to_string();
        let key = match request.url.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.clone(),
        };
        self.log.lock().unwrap().push(key.clone());

        let body = self
            .pages
            .get(&key)
            .or_else(|| self.pages.get(&path))
            .ok_or_else(|| FetchError::Status {
                url: request.url.to_string(),
                status: 404,
            })?;

        Ok(FetchedPage {
            url: request.url.clone(),
            status: 200,
            body: body.clone(),
        })
    }
}

fn config_text(workers: u32, max_attempts: u32) -> String {
    format!(
        r#"
[crawler]
host = "{}"
workers = {}
request-delay-ms = 0
max-attempts = {}

[storage]
database-path = ":memory:"

[[city]]
id = 2
name = "beijing"
"#,
        HOST, workers, max_attempts
    )
}

fn coordinator(
    storage: &SharedStorage,
    pass: CrawlPass,
    workers: u32,
    fetcher: &Arc<MockFetcher>,
) -> Coordinator {
    let config = parse_config(&config_text(workers, 0)).unwrap();
    Coordinator::new(
        Arc::new(config),
        "test-hash",
        pass,
        storage.clone(),
        fetcher.clone(),
    )
    .unwrap()
}

async fn run(
    storage: &SharedStorage,
    pass: CrawlPass,
    workers: u32,
    fetcher: &Arc<MockFetcher>,
) -> RunSummary {
    coordinator(storage, pass, workers, fetcher)
        .run()
        .await
        .unwrap()
}

fn links(container: &str, hrefs: &[&str]) -> String {
    let anchors: String = hrefs
        .iter()
        .map(|h| format!(r#"<a href="{}">x</a>"#, h))
        .collect();
    format!(r#"<div id="{}">{}</div>"#, container, anchors)
}

fn listing(shops: &[u32], next: Option<&str>) -> String {
    let items: String = shops
        .iter()
        .map(|id| format!(r#"<li><div class="pic"><a href="/shop/{}">s</a></div></li>"#, id))
        .collect();
    let next = next
        .map(|href| format!(r#"<a class="next" href="{}">next</a>"#, href))
        .unwrap_or_default();
    format!(r#"<div id="shop-all-list"><ul>{}</ul></div>{}"#, items, next)
}

fn detail(name: &str) -> String {
    format!(r#"<div id="basic-info"><h1 class="shop-name">{}</h1></div>"#, name)
}

/// One city, two regions with three listings each; the first listing has a
/// second page. Region `r2` is left out so callers can add or omit it.
fn discovery_site() -> MockFetcher {
    let base = "/search/category/2/10";
    let mut fetcher = MockFetcher::default()
        .page(base, links("classfy", &["/search/category/2/10/r1", "/search/category/2/10/r2"]))
        .page(
            "/search/category/2/10/r1",
            links("J_nt_items", &["/list/r1a", "/list/r1b", "/list/r1c"]),
        )
        .page("/list/r1a", listing(&[1, 2], Some("/list/r1a/p2")))
        .page("/list/r1a/p2", listing(&[3, 4], None));

    for empty in ["/list/r1b", "/list/r1c", "/list/r2a", "/list/r2b", "/list/r2c"] {
        fetcher = fetcher.page(empty, listing(&[], None));
    }
    for id in 1..=4 {
        fetcher = fetcher.page(&format!("/shop/{}", id), detail(&format!("Shop {}", id)));
    }
    fetcher
}

fn with_second_region(fetcher: MockFetcher) -> MockFetcher {
    fetcher.page(
        "/search/category/2/10/r2",
        links("J_nt_items", &["/list/r2a", "/list/r2b", "/list/r2c"]),
    )
}

#[tokio::test]
async fn test_discovery_scenario() {
    let storage = shared(SqliteStorage::new_in_memory().unwrap());
    let fetcher = Arc::new(with_second_region(discovery_site()));

    let summary = run(&storage, CrawlPass::Discovery, 1, &fetcher).await;

    // city + 2 regions + 6 listings + 1 continuation + 4 details
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.completed, 14);
    assert_eq!(fetcher.fetched().len(), 14);

    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_documents("shops").unwrap(), 4);
    for id in 1..=4 {
        let shop = storage.get_document("shops", &id.to_string()).unwrap().unwrap();
        assert_eq!(shop.body["_id"], id.to_string());
        assert_eq!(shop.body["name"], format!("Shop {}", id));
    }
    assert_eq!(
        storage
            .count_ledger_entries(CrawlPass::Discovery, EntryStatus::Finished)
            .unwrap(),
        14
    );
}

#[tokio::test]
async fn test_breadth_first_dispatch() {
    let storage = shared(SqliteStorage::new_in_memory().unwrap());
    let fetcher = Arc::new(with_second_region(discovery_site()));

    run(&storage, CrawlPass::Discovery, 1, &fetcher).await;

    let last_region = fetcher
        .position("/search/category/2/10/r1")
        .max(fetcher.position("/search/category/2/10/r2"));
    let first_listing = fetcher.position("/list/r1a");
    let continuation = fetcher.position("/list/r1a/p2");
    let first_detail = (1..=4)
        .map(|id| fetcher.position(&format!("/shop/{}", id)))
        .min()
        .unwrap();

    assert_eq!(fetcher.position("/search/category/2/10"), 0);
    assert!(last_region < first_listing);
    assert!(continuation < first_detail);
}

#[tokio::test]
async fn test_pagination_terminates_after_last_page() {
    let storage = shared(SqliteStorage::new_in_memory().unwrap());
    let fetcher = Arc::new(with_second_region(discovery_site()));

    run(&storage, CrawlPass::Discovery, 2, &fetcher).await;

    let listing_pages: Vec<String> = fetcher
        .fetched()
        .into_iter()
        .filter(|k| k.starts_with("/list/r1a"))
        .collect();
    assert_eq!(listing_pages.len(), 2);
}

#[tokio::test]
async fn test_resume_dispatches_only_unfinished_work() {
    let storage = shared(SqliteStorage::new_in_memory().unwrap());

    // r2 is missing: its task fails and stays unfinished
    let first = Arc::new(discovery_site());
    let summary = run(&storage, CrawlPass::Discovery, 2, &first).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(
        storage
            .lock()
            .unwrap()
            .count_ledger_entries(CrawlPass::Discovery, EntryStatus::Pending)
            .unwrap(),
        1
    );

    let second = Arc::new(with_second_region(discovery_site()));
    let summary = run(&storage, CrawlPass::Discovery, 2, &second).await;
    assert_eq!(summary.failed, 0);

    let mut refetched = second.fetched();
    refetched.sort();
    assert_eq!(
        refetched,
        vec![
            "/list/r2a".to_string(),
            "/list/r2b".to_string(),
            "/list/r2c".to_string(),
            "/search/category/2/10/r2".to_string(),
        ]
    );

    let third = Arc::new(with_second_region(discovery_site()));
    let summary = run(&storage, CrawlPass::Discovery, 2, &third).await;
    assert_eq!(summary.completed, 0);
    assert!(third.fetched().is_empty());
}

#[tokio::test]
async fn test_interrupted_run_is_resumed_with_same_run() {
    let storage = shared(SqliteStorage::new_in_memory().unwrap());
    let fetcher = Arc::new(with_second_region(discovery_site()));

    let mut interrupted = coordinator(&storage, CrawlPass::Discovery, 1, &fetcher);
    interrupted.shutdown_handle().trigger();
    let first = interrupted.run().await.unwrap();
    assert_eq!(first.status, RunStatus::Interrupted);
    assert!(fetcher.fetched().is_empty());

    let second = run(&storage, CrawlPass::Discovery, 1, &fetcher).await;
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.completed, 14);
}

#[tokio::test]
async fn test_shared_detail_is_fetched_once() {
    let storage = shared(SqliteStorage::new_in_memory().unwrap());
    let fetcher = Arc::new(
        with_second_region(discovery_site()).page("/list/r2b", listing(&[1, 2], None)),
    );

    let summary = run(&storage, CrawlPass::Discovery, 2, &fetcher).await;
    assert_eq!(summary.completed, 14);

    let shop_fetches = fetcher
        .fetched()
        .into_iter()
        .filter(|k| k == "/shop/1")
        .count();
    assert_eq!(shop_fetches, 1);
}

fn review_page(ids: &[u32], next: Option<&str>) -> String {
    let items: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<li data-id="{id}"><div class="pic"><a user-id="{user}">u</a></div>
                <div class="content"><div class="comment-txt"><div>review {id}</div></div></div></li>"#,
                id = id,
                user = id + 9000
            )
        })
        .collect();
    let next = next
        .map(|href| format!(r#"<div class="Pages"><a class="NextPage" href="{}">next</a></div>"#, href))
        .unwrap_or_default();
    format!(r#"<div class="comment-list"><ul>{}</ul></div>{}"#, items, next)
}

#[tokio::test]
async fn test_feedback_and_actor_passes() {
    let storage = shared(SqliteStorage::new_in_memory().unwrap());
    Accumulator::new(storage.clone(), true)
        .create(
            "shops",
            "7",
            &json!({
                "_id": "7",
                "url": format!("{}/shop/7", HOST),
                "meta": {"city_id": 2, "city_name": "beijing", "category_id": 10, "category_url_name": "food"}
            }),
        )
        .unwrap();

    let summary_body = json!({
        "summarys": [
            {"summaryName": "tasty", "summaryCount": 3},
            {"summaryName": "quiet", "summaryCount": 1}
        ],
        "dishTagStrList": ["dumplings"]
    })
    .to_string();
    let tagged_body = json!({
        "msg": r#"<li class="comment-item" data-id="55"><a class="avatar" data-user-id="9001">u</a><p class="desc">nice</p></li>"#
    })
    .to_string();

    let fetcher = Arc::new(
        MockFetcher::default()
            .page("/ajax/json/shopDynamic/allReview", summary_body)
            .page("/shop/7/review_all", review_page(&[1], Some("?pageno=2")))
            .page("/shop/7/review_all?pageno=2", review_page(&[2], None))
            .page("/ajax/json/shopfood/wizard/getReviewListFPAjax", tagged_body),
    );

    let summary = run(&storage, CrawlPass::Feedback, 2, &fetcher).await;
    // summary + 2 feedback pages + 2 tagged pages
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.failed, 0);

    let group = storage
        .lock()
        .unwrap()
        .get_document("feedback", "7")
        .unwrap()
        .unwrap();
    assert_eq!(group.body["tags"], json!([["tasty", 3], ["quiet", 1]]));
    assert_eq!(group.body["recommend_cuisines"], json!(["dumplings"]));
    let review_ids: Vec<i64> = group.body["reviews"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["_id"].as_i64().unwrap())
        .collect();
    assert_eq!(review_ids, vec![1, 2]);
    let mut tags: Vec<&str> = group.body["tagged_reviews"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["tag"].as_str().unwrap())
        .collect();
    tags.sort();
    assert_eq!(tags, vec!["quiet", "tasty"]);

    let profile = |name: &str| {
        format!(
            r#"<div class="tit"><h2 class="name">{}</h2></div><span id="J_col_exp">10</span>"#,
            name
        )
    };
    let actors = Arc::new(
        MockFetcher::default()
            .page("/member/9001", profile("first"))
            .page("/member/9002", profile("second"))
            .page("/member/9001/follows", r#"<div class="fllow-list"></div>"#)
            .page("/member/9002/follows", r#"<div class="fllow-list"></div>"#)
            .page(
                "/member/9001/fans",
                r#"<div class="fllow-list"><div class="pic-txt"><ul>
                    <li><div class="tit"><a user-id="31">a</a></div></li>
                    <li><div class="tit"><a user-id="32">b</a></div></li>
                </ul></div></div>"#,
            )
            .page("/member/9002/fans", r#"<div class="fllow-list"></div>"#)
            .page("/member/9001/wishlists", r#"<div class="favor-list"></div>"#)
            .page("/member/9002/wishlists", r#"<div class="favor-list"></div>"#),
    );

    let summary = run(&storage, CrawlPass::Actor, 2, &actors).await;
    // 2 profiles, 3 relation pages each
    assert_eq!(summary.completed, 8);
    assert_eq!(summary.failed, 0);

    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_documents("actors").unwrap(), 2);
    let actor = storage.get_document("actors", "9001").unwrap().unwrap();
    assert_eq!(actor.body["name"], "first");
    assert_eq!(actor.body["followers"], json!([31, 32]));
    assert_eq!(actor.body["followees"], json!([]));
}
