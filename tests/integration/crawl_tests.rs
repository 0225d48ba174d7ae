//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! crawl cycle end-to-end through the bundled HTTP executor.

use spider_core::config::{parse_config, Config};
use spider_core::crawler::{run_crawl, StopReason};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a fast test configuration crawling `start_url`
fn create_test_config(start_url: &str, dir: &Path) -> Config {
    let toml = format!(
        r#"
[crawl]
start-url = "{start_url}"

[rate]
initial-workers = 2
min-workers = 1
max-workers = 4
initial-delay = 0.0
min-delay = 0.0
max-delay = 0.0

[retry]
error-retry-after = 0.05
session-retry-after = 0.05

[workers]
reconcile-interval = 0.05
idle-poll = 0.02
shutdown-timeout = 2.0

[checkpoint]
path = "{checkpoint}"

[orchestrator]
grace-period = 0.2
poll-interval = 0.02
shutdown-deadline = 5.0

[output]
pages-path = "{pages}"
"#,
        start_url = start_url,
        checkpoint = dir.join("checkpoint.json").display(),
        pages = dir.join("pages.jsonl").display(),
    );
    parse_config(&toml).expect("Failed to parse test config")
}

fn html_page(title: &str, links: &[String]) -> ResponseTemplate {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{}">{}</a>"#, href, href))
        .collect();
    ResponseTemplate::new(200)
        .set_body_raw(
            format!(
                "<html><head><title>{}</title></head><body>{}</body></html>",
                title, anchors
            ),
            "text/html",
        )
}

async fn mount_page(server: &MockServer, route: &str, template: ResponseTemplate, calls: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .expect(calls)
        .mount(server)
        .await;
}

fn read_pages(dir: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(dir.join("pages.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("Invalid JSON line"))
        .collect()
}

async fn crawl(config: Config, fresh: bool) -> spider_core::CrawlSummary {
    tokio::time::timeout(Duration::from_secs(30), run_crawl(config, fresh))
        .await
        .expect("Crawl timed out")
        .expect("Crawl failed")
}

#[tokio::test]
async fn test_full_crawl_single_site() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    mount_page(
        &mock_server,
        "/",
        html_page(
            "Home",
            &[format!("{}/page1", base_url), format!("{}/page2", base_url)],
        ),
        1,
    )
    .await;
    mount_page(
        &mock_server,
        "/page1",
        html_page("Page 1", &[format!("{}/page2", base_url), "/".to_string()]),
        1,
    )
    .await;
    mount_page(&mock_server, "/page2", html_page("Page 2", &[]), 1).await;

    let config = create_test_config(&format!("{}/", base_url), dir.path());
    let summary = crawl(config, true).await;

    assert_eq!(summary.stop_reason, StopReason::Completed);
    assert_eq!(summary.pages_visited, 3);
    assert_eq!(summary.counters.pages_succeeded, 3);
    assert!(summary.checkpoint_saved);

    let pages = read_pages(dir.path());
    assert_eq!(pages.len(), 3);
    let titles: Vec<&str> = pages
        .iter()
        .filter_map(|p| p["data"]["title"].as_str())
        .collect();
    assert!(titles.contains(&"Page 1"));
    assert!(titles.contains(&"Page 2"));

    // Wiremock verifies the call counts when mock_server drops
}

#[tokio::test]
async fn test_out_of_scope_links_are_not_followed() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    mount_page(
        &mock_server,
        "/docs",
        html_page(
            "Docs",
            &[
                format!("{}/docs/guide", base_url),
                format!("{}/blog/post", base_url),
                format!("{}/docs/style.css", base_url),
                "https://elsewhere.test/docs/page".to_string(),
            ],
        ),
        1,
    )
    .await;
    mount_page(&mock_server, "/docs/guide", html_page("Guide", &[]), 1).await;
    mount_page(&mock_server, "/blog/post", html_page("Blog", &[]), 0).await;
    mount_page(&mock_server, "/docs/style.css", html_page("CSS", &[]), 0).await;

    // The start URL normalizes to /docs; the prefix stays /docs
    let config = create_test_config(&format!("{}/docs/", base_url), dir.path());
    let summary = crawl(config, true).await;

    assert_eq!(summary.stop_reason, StopReason::Completed);
    assert_eq!(summary.pages_visited, 2);
}

#[tokio::test]
async fn test_rate_limited_page_is_retried() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    mount_page(
        &mock_server,
        "/",
        html_page("Home", &[format!("{}/busy", base_url)]),
        1,
    )
    .await;

    // First request is throttled, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_page(&mock_server, "/busy", html_page("Busy", &[]), 1).await;

    let config = create_test_config(&format!("{}/", base_url), dir.path());
    let summary = crawl(config, true).await;

    assert_eq!(summary.stop_reason, StopReason::Completed);
    assert_eq!(summary.pages_visited, 2);
    assert_eq!(summary.counters.retries_scheduled, 1);
    assert_eq!(summary.rate.rate_limited_requests, 1);
}

#[tokio::test]
async fn test_missing_page_is_skipped_without_retry() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    mount_page(
        &mock_server,
        "/",
        html_page("Home", &[format!("{}/gone", base_url)]),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&format!("{}/", base_url), dir.path());
    let summary = crawl(config, true).await;

    assert_eq!(summary.stop_reason, StopReason::Completed);
    assert_eq!(summary.counters.http_errors, 1);
    assert_eq!(summary.counters.retries_scheduled, 0);
    assert_eq!(summary.visited_total, 2);
}

#[tokio::test]
async fn test_resume_skips_visited_pages() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    mount_page(
        &mock_server,
        "/",
        html_page(
            "Home",
            &[format!("{}/a", base_url), format!("{}/b", base_url)],
        ),
        1,
    )
    .await;
    mount_page(&mock_server, "/a", html_page("A", &[]), 1).await;
    mount_page(&mock_server, "/b", html_page("B", &[]), 1).await;

    // First run stops after the start page
    let mut config = create_test_config(&format!("{}/", base_url), dir.path());
    config.crawl.max_pages = Some(1);
    let first = crawl(config.clone(), true).await;
    assert_eq!(first.stop_reason, StopReason::MaxPages);
    assert_eq!(first.pages_visited, 1);
    assert!(dir.path().join("checkpoint.json").exists());

    // Second run resumes with the remaining links
    config.crawl.max_pages = None;
    let second = crawl(config, false).await;
    assert_eq!(second.stop_reason, StopReason::Completed);
    assert_eq!(second.pages_visited, 3);
    assert_eq!(read_pages(dir.path()).len(), 3);
}

#[tokio::test]
async fn test_checkpoint_records_config_hash() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    mount_page(&mock_server, "/", html_page("Home", &[]), 1).await;

    let config = create_test_config(&format!("{}/", base_url), dir.path());
    let expected = config.source_hash.clone().expect("Parsed config has a hash");
    let summary = crawl(config, true).await;
    assert!(summary.checkpoint_saved);

    let checkpoint: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("checkpoint.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(checkpoint["config_hash"], expected.as_str());
}
