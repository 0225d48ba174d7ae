use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for a crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// SHA-256 of the TOML text this config was parsed from
    #[serde(skip)]
    pub source_hash: Option<String>,
}

/// Crawl scope and budget
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// URL the crawl is seeded with
    #[serde(rename = "start-url")]
    pub start_url: String,

    /// Maximum link depth from the start URL
    #[serde(rename = "max-depth", default)]
    pub max_depth: Option<u32>,

    /// Stop after this many successfully processed pages
    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u64>,

    /// Only follow links under this path (defaults to the start URL's path)
    #[serde(rename = "path-prefix", default)]
    pub path_prefix: Option<String>,

    /// Follow links to subdomains of the start domain
    #[serde(rename = "allow-subdomains", default)]
    pub allow_subdomains: bool,
}

/// Adaptive rate control bounds. Times are in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateConfig {
    pub initial_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub initial_delay: f64,
    pub min_delay: f64,
    pub max_delay: f64,
    /// Number of recent outcomes considered when evaluating success rate
    pub window_size: usize,
    pub adjustment_interval: f64,
    /// Minimum time between two forced reductions
    pub cooldown: f64,
    /// Consecutive successes required before stepping down one recovery level
    pub recovery_successes: u32,
    /// Minimum time spent at a recovery level before stepping down
    pub recovery_dwell: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            initial_workers: 4,
            min_workers: 1,
            max_workers: 8,
            initial_delay: 1.0,
            min_delay: 0.5,
            max_delay: 30.0,
            window_size: 20,
            adjustment_interval: 30.0,
            cooldown: 300.0,
            recovery_successes: 20,
            recovery_dwell: 60.0,
        }
    }
}

/// Retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_factor: f64,
    /// Base delay for generic executor errors (seconds)
    pub error_retry_after: f64,
    /// Base delay for session failures and lost workers (seconds)
    pub session_retry_after: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 1.5,
            error_retry_after: 30.0,
            session_retry_after: 5.0,
        }
    }
}

impl RetryConfig {
    pub fn error_retry_after(&self) -> Duration {
        Duration::from_secs_f64(self.error_retry_after)
    }

    pub fn session_retry_after(&self) -> Duration {
        Duration::from_secs_f64(self.session_retry_after)
    }
}

/// Worker pool supervision
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorkerConfig {
    pub reconcile_interval: f64,
    /// A busy worker silent for longer than this is considered hung
    pub heartbeat_timeout: f64,
    /// How long an idle worker waits on the task channel before re-checking
    pub idle_poll: f64,
    pub shutdown_timeout: f64,
    /// Executor restarts a worker attempts before giving up
    pub max_restarts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: 5.0,
            heartbeat_timeout: 120.0,
            idle_poll: 1.0,
            shutdown_timeout: 10.0,
            max_restarts: 3,
        }
    }
}

impl WorkerConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs_f64(self.reconcile_interval)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_timeout)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs_f64(self.idle_poll)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_timeout)
    }
}

/// Checkpoint persistence
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub path: String,
    pub auto_save_interval: f64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "spider_checkpoint.json".to_string(),
            auto_save_interval: 300.0,
        }
    }
}

impl CheckpointConfig {
    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs_f64(self.auto_save_interval)
    }
}

/// Orchestrator loop timing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OrchestratorConfig {
    /// Idle time required before an empty frontier ends the crawl
    pub grace_period: f64,
    /// Receive timeout used by the control loops
    pub poll_interval: f64,
    /// Upper bound on the whole shutdown sequence
    pub shutdown_deadline: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            grace_period: 5.0,
            poll_interval: 1.0,
            shutdown_deadline: 30.0,
        }
    }
}

impl OrchestratorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs_f64(self.grace_period)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_deadline)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url", default)]
    pub contact_url: Option<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "spider-core".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
        }
    }
}

/// Settings for the bundled HTTP executor
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetchConfig {
    /// Request timeout in seconds
    pub timeout: f64,
    /// Path extensions considered pages; extensionless paths always are
    pub allowed_extensions: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: 30.0,
            allowed_extensions: [".html", ".htm", ".php", ".asp", ".aspx", ".jsp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// JSON-lines file receiving one record per processed page
    #[serde(rename = "pages-path", default)]
    pub pages_path: Option<String>,
}
