//! Output module for crawl results and reports
//!
//! This module handles:
//! - Writing successful pages through a `PageSink`
//! - Tracking crawl counters
//! - Printing the end-of-run summary

mod jsonl;
pub mod stats;
mod traits;

pub use jsonl::JsonLinesSink;
pub use stats::{print_summary, CrawlCounters, CrawlSummary};
pub use traits::{NullSink, OutputError, OutputResult, PageSink};

use crate::config::OutputConfig;
use std::path::Path;
use std::sync::Arc;

/// Builds the page sink named by the output configuration
///
/// # Arguments
///
/// * `config` - Output settings
/// * `resume` - Append to an existing pages file instead of truncating it
///
/// # Returns
///
/// A `JsonLinesSink` when `pages-path` is set, a `NullSink` otherwise.
pub fn sink_from_config(config: &OutputConfig, resume: bool) -> OutputResult<Arc<dyn PageSink>> {
    match &config.pages_path {
        Some(path) => {
            tracing::info!("Writing pages to {}", path);
            Ok(Arc::new(JsonLinesSink::open(Path::new(path), resume)?))
        }
        None => Ok(Arc::new(NullSink)),
    }
}
