//! HTTP task executor
//!
//! Fetches a page with reqwest, classifies the status, and extracts the
//! in-scope links with scraper. Redirects are followed by the client.

use crate::config::{Config, UserAgentConfig};
use crate::executor::{
    links::parse_html, ErrorKind, ExecutorError, ExecutorFactory, ResponseAction,
    ResponseClassifier, StatusClassifier, TaskExecutor, TaskOutcome,
};
use crate::url::CrawlScope;
use crate::SpiderError;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Builds an HTTP client with the crawler's user agent
///
/// The user agent reads `Name/Version` or `Name/Version (+ContactURL)`.
///
/// # Example
///
/// ```no_run
/// use spider_core::config::UserAgentConfig;
/// use spider_core::executor::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "spider-core".to_string(),
///     crawler_version: "0.1.0".to_string(),
///     contact_url: Some("https://example.com/bot".to_string()),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent(config))
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

fn user_agent(config: &UserAgentConfig) -> String {
    match &config.contact_url {
        Some(contact) => format!(
            "{}/{} (+{})",
            config.crawler_name, config.crawler_version, contact
        ),
        None => format!("{}/{}", config.crawler_name, config.crawler_version),
    }
}

/// `TaskExecutor` backed by a shared reqwest client
pub struct HttpExecutor {
    client: Client,
    scope: Arc<CrawlScope>,
    classifier: Arc<dyn ResponseClassifier>,
}

impl HttpExecutor {
    pub fn new(client: Client, scope: Arc<CrawlScope>, classifier: Arc<dyn ResponseClassifier>) -> Self {
        Self {
            client,
            scope,
            classifier,
        }
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn execute(&self, url: &str, depth: u32) -> Result<TaskOutcome, ExecutorError> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Ok(TaskOutcome::error(format!("Invalid request: {}", e), ErrorKind::Fatal));
            }
            Err(e) if e.is_timeout() => {
                return Ok(TaskOutcome::error("Request timeout", ErrorKind::Transient));
            }
            Err(e) => {
                return Ok(TaskOutcome::error(e.to_string(), ErrorKind::Transient));
            }
        };

        let status = response.status().as_u16();
        let classification = self.classifier.classify(Some(status));

        if classification.action != ResponseAction::Process {
            let classification = match retry_after_header(&response) {
                Some(delay) => classification.with_retry_after(delay),
                None => classification,
            };
            tracing::debug!("{} -> HTTP {} ({})", url, status, classification.reason);
            return Ok(TaskOutcome::HttpError {
                status,
                classification,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.is_empty() && !content_type.contains("html") {
            return Ok(TaskOutcome::Skipped {
                reason: format!("Not an HTML page ({})", content_type),
            });
        }

        let final_url: Url = response.url().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Ok(TaskOutcome::error(
                    format!("Failed to read body: {}", e),
                    ErrorKind::Transient,
                ));
            }
        };

        let parsed = parse_html(&body, &final_url);
        let found = parsed.links.len();
        let links: Vec<String> = parsed
            .links
            .into_iter()
            .filter(|link| Url::parse(link).map_or(false, |u| self.scope.contains(&u)))
            .collect();

        tracing::debug!(
            "{} -> {} links ({} in scope)",
            url,
            found,
            links.len()
        );

        let payload = serde_json::json!({
            "url": url,
            "final_url": final_url.as_str(),
            "depth": depth,
            "status": status,
            "title": parsed.title,
            "links_found": found,
            "links_in_scope": links.len(),
        });

        Ok(TaskOutcome::Success {
            links,
            payload,
            http_status: Some(status),
        })
    }
}

/// Parses a `Retry-After` header given in seconds
fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Hands every worker a clone of one shared client
pub struct HttpExecutorFactory {
    client: Client,
    scope: Arc<CrawlScope>,
    classifier: Arc<dyn ResponseClassifier>,
}

impl HttpExecutorFactory {
    pub fn new(client: Client, scope: CrawlScope) -> Self {
        Self {
            client,
            scope: Arc::new(scope),
            classifier: Arc::new(StatusClassifier),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, SpiderError> {
        let client = build_http_client(&config.user_agent, config.fetch.timeout())?;
        let scope = CrawlScope::from_config(&config.crawl, &config.fetch)?;
        tracing::info!(
            "Crawl scope: {} (prefix {})",
            scope.domain(),
            scope.path_prefix().unwrap_or("/")
        );
        Ok(Self::new(client, scope))
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ResponseClassifier>) -> Self {
        self.classifier = classifier;
        self
    }
}

#[async_trait]
impl ExecutorFactory for HttpExecutorFactory {
    async fn create(&self, worker_id: usize) -> Result<Box<dyn TaskExecutor>, ExecutorError> {
        tracing::debug!("Creating HTTP executor for worker {}", worker_id);
        Ok(Box::new(HttpExecutor::new(
            self.client.clone(),
            Arc::clone(&self.scope),
            Arc::clone(&self.classifier),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "TestSpider".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: Some("https://example.com/about".to_string()),
        }
    }

    fn executor_for(server: &MockServer) -> HttpExecutor {
        let start = Url::parse(&server.uri()).unwrap();
        let scope = CrawlScope::new(&start, false, None, vec![]).unwrap();
        let client = build_http_client(&create_test_config(), Duration::from_secs(5)).unwrap();
        HttpExecutor::new(client, Arc::new(scope), Arc::new(StatusClassifier))
    }

    #[test]
    fn test_user_agent_format() {
        let mut config = create_test_config();
        assert_eq!(user_agent(&config), "TestSpider/1.0 (+https://example.com/about)");
        config.contact_url = None;
        assert_eq!(user_agent(&config), "TestSpider/1.0");
        assert!(build_http_client(&config, Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn test_success_returns_in_scope_links() {
        let server = MockServer::start().await;
        let body = format!(
            r#"<html><head><title>Home</title></head><body>
                <a href="/a">A</a>
                <a href="{}/b/">B</a>
                <a href="https://elsewhere.test/">Out</a>
                <a href="/logo.png">Logo</a>
            </body></html>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let outcome = executor.execute(&format!("{}/", server.uri()), 0).await.unwrap();

        match outcome {
            TaskOutcome::Success {
                links,
                payload,
                http_status,
            } => {
                assert_eq!(http_status, Some(200));
                assert_eq!(
                    links,
                    vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())]
                );
                assert_eq!(payload["title"], "Home");
                assert_eq!(payload["links_found"], 4);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_uses_retry_after_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let outcome = executor.execute(&format!("{}/x", server.uri()), 1).await.unwrap();

        match outcome {
            TaskOutcome::HttpError {
                status,
                classification,
            } => {
                assert_eq!(status, 429);
                assert!(classification.rate_limited);
                assert_eq!(classification.retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_http_error_skip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let outcome = executor.execute(&format!("{}/gone", server.uri()), 1).await.unwrap();
        assert!(matches!(
            outcome,
            TaskOutcome::HttpError { status: 404, ref classification }
                if classification.action == ResponseAction::Skip
        ));
    }

    #[tokio::test]
    async fn test_non_html_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("{}", "application/json"),
            )
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let outcome = executor.execute(&format!("{}/data", server.uri()), 1).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        let client = build_http_client(&create_test_config(), Duration::from_secs(2)).unwrap();
        let start = Url::parse("http://127.0.0.1:1/").unwrap();
        let scope = CrawlScope::new(&start, false, None, vec![]).unwrap();
        let executor = HttpExecutor::new(client, Arc::new(scope), Arc::new(StatusClassifier));

        let outcome = executor.execute("http://127.0.0.1:1/", 0).await.unwrap();
        assert!(matches!(
            outcome,
            TaskOutcome::Error {
                kind: ErrorKind::Transient,
                ..
            }
        ));
    }
}
