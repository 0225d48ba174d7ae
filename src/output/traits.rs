//! Page sink trait and error types
//!
//! The orchestrator hands every successful page's payload to a `PageSink`.
//! The crawl engine does not interpret the payload; sinks decide how to
//! store it.

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Failed to format output: {0}")]
    Format(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Receives the payload of every successfully processed page
///
/// Implementations must be thread-safe. Errors are logged by the caller and
/// never stop the crawl.
pub trait PageSink: Send + Sync {
    /// Records a successfully processed page
    ///
    /// # Arguments
    ///
    /// * `url` - The page URL as dispatched
    /// * `depth` - Link depth from the start URL
    /// * `payload` - Whatever the executor returned for the page
    fn record_page(&self, url: &str, depth: u32, payload: &serde_json::Value) -> OutputResult<()>;

    /// Pushes buffered records to durable storage
    ///
    /// Called before every checkpoint save so that pages the checkpoint marks
    /// as visited are already on disk.
    fn flush(&self) -> OutputResult<()> {
        Ok(())
    }

    /// Flushes buffered output at the end of the crawl
    fn finalize(&self) -> OutputResult<()> {
        self.flush()
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl PageSink for NullSink {
    fn record_page(&self, _url: &str, _depth: u32, _payload: &serde_json::Value) -> OutputResult<()> {
        Ok(())
    }
}
