//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full fetch, extract and dispatch cycle end-to-end.

use delta_crawl::config::{parse_config, Config};
use delta_crawl::crawler::{Coordinator, HttpFetcher, RunSummary};
use delta_crawl::output::load_statistics;
use delta_crawl::state::EntryStatus;
use delta_crawl::storage::{shared, RunStatus, SharedStorage, SqliteStorage, Storage};
use delta_crawl::{CrawlPass, Ledger};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock server
fn create_test_config(host: &str, max_attempts: u32) -> Config {
    parse_config(&format!(
        r#"
[crawler]
host = "{}"
workers = 2
request-delay-ms = 0
max-attempts = {}

[session]
user-agent = "TestBot/1.0"
cookies = "cy=2; _hc.v=abc"
timeout-secs = 5

[storage]
database-path = ":memory:"

[[city]]
id = 2
name = "beijing"
"#,
        host, max_attempts
    ))
    .expect("test config is valid")
}

async fn run_pass(config: &Config, storage: &SharedStorage) -> RunSummary {
    let fetcher = Arc::new(HttpFetcher::new(&config.session).expect("fetcher"));
    let mut coordinator = Coordinator::new(
        Arc::new(config.clone()),
        "test-hash",
        CrawlPass::Discovery,
        storage.clone(),
        fetcher,
    )
    .expect("coordinator");
    coordinator.run().await.expect("run")
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(body.to_string())
}

async fn mount_city_index(server: &MockServer, regions: &[&str]) {
    let links: String = regions
        .iter()
        .map(|r| format!(r#"<a href="{}">region</a>"#, r))
        .collect();
    Mock::given(method("GET"))
        .and(path("/search/category/2/10"))
        .respond_with(html(&format!(r#"<div id="classfy">{}</div>"#, links)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_discovery_pass() {
    let server = MockServer::start().await;
    let config = create_test_config(&server.uri(), 3);
    let storage = shared(SqliteStorage::new_in_memory().unwrap());

    mount_city_index(&server, &["/search/category/2/10/g110"]).await;
    Mock::given(method("GET"))
        .and(path("/search/category/2/10/g110"))
        .respond_with(html(
            r#"<div id="J_nt_items"><a href="/search/category/2/10/g110r1">r1</a></div>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/category/2/10/g110r1"))
        .respond_with(html(
            r#"<div id="shop-all-list"><ul>
                <li><div class="pic"><a href="/shop/101">a</a></div></li>
                <li><div class="pic"><a href="/shop/102">b</a></div></li>
            </ul></div>
            <a class="next" href="/search/category/2/10/g110r1p2">next</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/category/2/10/g110r1p2"))
        .respond_with(html(
            r#"<div id="shop-all-list"><ul>
                <li><div class="pic"><a href="/shop/103">c</a></div></li>
                <li><div class="pic"><a href="/shop/101">a again</a></div></li>
            </ul></div>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/shop/\d+$"))
        .respond_with(html(
            r#"<div id="basic-info">
                <h1 class="shop-name">Noodle House<span>branch</span></h1>
                <div class="address"><span class="item">Wangfujing 1</span></div>
            </div>"#,
        ))
        .expect(3)
        .mount(&server)
        .await;

    let summary = run_pass(&config, &storage).await;

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.completed, 7);
    assert_eq!(summary.failed, 0);

    let storage = storage.lock().unwrap();
    assert_eq!(storage.count_documents("shops").unwrap(), 3);

    let shop = storage.get_document("shops", "101").unwrap().unwrap();
    assert_eq!(shop.body["name"], "Noodle House");
    assert_eq!(shop.body["meta"]["city_name"], "beijing");
    assert_eq!(shop.body["url"], format!("{}/shop/101", server.uri()));

    assert_eq!(
        storage
            .count_ledger_entries(CrawlPass::Discovery, EntryStatus::Finished)
            .unwrap(),
        7
    );
    let run = storage.get_run(summary.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_session_headers_are_sent() {
    let server = MockServer::start().await;
    let config = create_test_config(&server.uri(), 3);
    let storage = shared(SqliteStorage::new_in_memory().unwrap());

    Mock::given(method("GET"))
        .and(path("/search/category/2/10"))
        .and(header("user-agent", "TestBot/1.0"))
        .and(header("cookie", "cy=2; _hc.v=abc"))
        .respond_with(html(r#"<div id="classfy"></div>"#))
        .expect(1)
        .mount(&server)
        .await;

    let summary = run_pass(&config, &storage).await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_resume_after_server_errors() {
    let server = MockServer::start().await;
    let config = create_test_config(&server.uri(), 0);
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("delta.db");

    mount_city_index(&server, &["/search/category/2/10/g110"]).await;
    Mock::given(method("GET"))
        .and(path("/search/category/2/10/g110"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    {
        let storage = shared(SqliteStorage::new(&db_path).unwrap());
        let summary = run_pass(&config, &storage).await;
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.dead_lettered, 0);
    }

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/search/category/2/10"))
        .respond_with(html(r#"<div id="classfy"></div>"#))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/category/2/10/g110"))
        .respond_with(html(r#"<div id="J_nt_items"></div>"#))
        .expect(1)
        .mount(&server)
        .await;

    let storage = shared(SqliteStorage::new(&db_path).unwrap());
    let summary = run_pass(&config, &storage).await;
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);

    let storage = storage.lock().unwrap();
    assert_eq!(
        storage
            .count_ledger_entries(CrawlPass::Discovery, EntryStatus::Pending)
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_poison_task_is_dead_lettered_and_revived() {
    let server = MockServer::start().await;
    let config = create_test_config(&server.uri(), 2);
    let storage = shared(SqliteStorage::new_in_memory().unwrap());

    mount_city_index(&server, &["/search/category/2/10/g110"]).await;
    Mock::given(method("GET"))
        .and(path("/search/category/2/10/g110"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let first = run_pass(&config, &storage).await;
    assert_eq!(first.failed, 1);
    assert_eq!(first.dead_lettered, 0);

    let second = run_pass(&config, &storage).await;
    assert_eq!(second.failed, 1);
    assert_eq!(second.dead_lettered, 1);

    let third = run_pass(&config, &storage).await;
    assert_eq!(third.completed, 0);
    assert_eq!(third.failed, 0);

    {
        let guard = storage.lock().unwrap();
        let stats = load_statistics(&*guard, CrawlPass::Discovery, &config.storage).unwrap();
        assert_eq!(stats.count(EntryStatus::DeadLettered), 1);
        assert_eq!(stats.count(EntryStatus::Finished), 1);
    }

    let ledger = Ledger::new(storage.clone(), config.crawler.max_attempts);
    assert_eq!(ledger.revive_dead_letters(CrawlPass::Discovery).unwrap(), 1);
    assert_eq!(ledger.pending(CrawlPass::Discovery).unwrap().len(), 1);
}
