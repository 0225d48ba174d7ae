//! spider-core: an adaptive crawl orchestration engine
//!
//! This crate drives a pool of concurrent fetch workers over a website's link
//! graph. It keeps throughput high while reacting to rate-limit and error
//! signals from the server, and it checkpoints progress so an interrupted
//! crawl resumes without losing or repeating work.
//!
//! Fetching and content extraction sit behind the `TaskExecutor` trait; a
//! reqwest-based implementation ships in `executor::http`.

pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod executor;
pub mod output;
pub mod rate;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum SpiderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Executor error: {0}")]
    Executor(#[from] executor::ExecutorError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Checkpoint read/write errors
///
/// These stay inside the checkpoint manager, which logs them and falls back
/// rather than failing the crawl.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Checkpoint is missing required field '{0}'")]
    MissingField(&'static str),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, SpiderError>;

// Re-export commonly used types
pub use checkpoint::{CheckpointManager, CheckpointSnapshot};
pub use config::Config;
pub use crawler::{run_crawl, Coordinator, Frontier, StopHandle, StopReason};
pub use executor::{ExecutorFactory, TaskExecutor, TaskOutcome};
pub use output::CrawlSummary;
pub use rate::RateController;
pub use url::normalize_url;
