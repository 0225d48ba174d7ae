//! Task executor boundary
//!
//! Workers hand each URL to a `TaskExecutor` and get back exactly one tagged
//! `TaskOutcome`. The crawl engine never looks inside the payload; it only
//! pattern-matches on the outcome tag and, for errors, on `ErrorKind`.
//!
//! - `TaskExecutor`: fetches and processes one URL
//! - `ExecutorFactory`: builds one executor per worker, and again after a
//!   session failure
//! - `ResponseClassifier`: maps HTTP statuses to retry/skip/throttle actions
//! - `HttpExecutor`: reqwest + scraper implementation

mod classify;
pub mod http;
mod links;

pub use classify::{Classification, ResponseAction, ResponseClassifier, StatusClassifier};
pub use http::{build_http_client, HttpExecutor, HttpExecutorFactory};
pub use links::{extract_links, parse_html, ParsedPage};

use crate::state::OutcomeSummary;
use async_trait::async_trait;
use thiserror::Error;

/// Errors an executor reports instead of an outcome
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor could not be created
    #[error("Executor initialization failed: {0}")]
    Init(String),

    /// The executor's session is broken and it must be recreated
    #[error("Executor session failed: {0}")]
    Session(String),

    #[error("Executor error: {0}")]
    Other(String),
}

/// How a failed task should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network hiccup or similar; worth one more attempt
    Transient,
    /// The executor session failed mid-task
    Session,
    /// The worker died or hung while holding the task
    WorkerLost,
    /// The URL cannot be processed; do not retry
    Fatal,
}

/// The single result of executing one task
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success {
        links: Vec<String>,
        payload: serde_json::Value,
        http_status: Option<u16>,
    },
    HttpError {
        status: u16,
        classification: Classification,
    },
    Skipped {
        reason: String,
    },
    Error {
        message: String,
        kind: ErrorKind,
    },
}

impl TaskOutcome {
    pub fn error(message: impl Into<String>, kind: ErrorKind) -> Self {
        TaskOutcome::Error {
            message: message.into(),
            kind,
        }
    }

    /// Short tag used in logs
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Success { .. } => "success",
            TaskOutcome::HttpError { .. } => "http_error",
            TaskOutcome::Skipped { .. } => "skipped",
            TaskOutcome::Error { .. } => "error",
        }
    }

    /// The signal the rate controller consumes
    ///
    /// Lost-worker results carry no information about the server and return
    /// `None`.
    pub fn rate_signal(&self) -> Option<OutcomeSummary> {
        match self {
            TaskOutcome::Success { http_status, .. } => Some(OutcomeSummary::success(*http_status)),
            TaskOutcome::HttpError {
                status,
                classification,
            } => Some(OutcomeSummary::failure(
                Some(*status),
                classification.rate_limited,
            )),
            TaskOutcome::Skipped { .. } => Some(OutcomeSummary::failure(None, false)),
            TaskOutcome::Error {
                kind: ErrorKind::WorkerLost,
                ..
            } => None,
            TaskOutcome::Error { .. } => Some(OutcomeSummary::failure(None, false)),
        }
    }
}

/// Processes one URL
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, url: &str, depth: u32) -> Result<TaskOutcome, ExecutorError>;

    /// Releases any session resources; called before the executor is dropped
    async fn close(&self) {}
}

/// Creates executors for workers
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn create(&self, worker_id: usize) -> Result<Box<dyn TaskExecutor>, ExecutorError>;
}
