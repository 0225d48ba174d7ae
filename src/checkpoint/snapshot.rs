//! Checkpoint file format
//!
//! A checkpoint is a single JSON object. `visited`, `frontier`,
//! `pages_visited` and `checkpoint_time` are required; everything else
//! defaults so older or hand-edited files still load.

use crate::crawler::{FrontierSnapshot, ScheduledRetry, UrlRecord};
use crate::output::CrawlCounters;
use crate::state::RateControllerState;
use crate::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CHECKPOINT_VERSION: &str = "1.0";

const REQUIRED_KEYS: [&str; 4] = ["visited", "frontier", "pages_visited", "checkpoint_time"];

fn default_version() -> String {
    CHECKPOINT_VERSION.to_string()
}

/// Everything needed to resume a crawl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub visited: Vec<String>,
    pub frontier: Vec<UrlRecord>,
    #[serde(default)]
    pub pending: Vec<UrlRecord>,
    pub pages_visited: u64,
    pub checkpoint_time: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub checkpoint_version: String,
    #[serde(default)]
    pub rate_controller_state: Option<RateControllerState>,
    #[serde(default)]
    pub retry_counts: HashMap<String, u32>,
    #[serde(default)]
    pub scheduled_retries: Vec<ScheduledRetry>,
    #[serde(default)]
    pub stats: CrawlCounters,
    #[serde(default)]
    pub config_hash: Option<String>,
}

impl CheckpointSnapshot {
    /// Builds a snapshot stamped with the current time
    pub fn new(frontier: FrontierSnapshot, pages_visited: u64) -> Self {
        Self {
            visited: frontier.visited,
            frontier: frontier.frontier,
            pending: frontier.pending,
            pages_visited,
            checkpoint_time: Utc::now(),
            checkpoint_version: default_version(),
            rate_controller_state: None,
            retry_counts: HashMap::new(),
            scheduled_retries: Vec::new(),
            stats: CrawlCounters::default(),
            config_hash: None,
        }
    }

    /// Parses and validates checkpoint JSON
    ///
    /// # Returns
    ///
    /// * `Ok(CheckpointSnapshot)` - The file is complete
    /// * `Err(CheckpointError)` - Malformed JSON, not an object, or a
    ///   required key is missing
    pub fn from_json(content: &str) -> Result<Self, CheckpointError> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        for key in REQUIRED_KEYS {
            if value.get(key).is_none() {
                return Err(CheckpointError::MissingField(key));
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The frontier contents to restore
    ///
    /// Scheduled retries were outside every set when the checkpoint was
    /// taken; they rejoin the queue after the saved frontier.
    pub fn frontier_snapshot(&self) -> FrontierSnapshot {
        let mut frontier = self.frontier.clone();
        frontier.extend(
            self.scheduled_retries
                .iter()
                .map(|r| UrlRecord::new(r.url.clone(), r.depth)),
        );
        FrontierSnapshot {
            visited: self.visited.clone(),
            frontier,
            pending: self.pending.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::RetryAction;

    fn create_test_snapshot() -> CheckpointSnapshot {
        let mut snapshot = CheckpointSnapshot::new(
            FrontierSnapshot {
                visited: vec!["https://example.com/".to_string()],
                frontier: vec![UrlRecord::new("https://example.com/b", 1)],
                pending: vec![UrlRecord::new("https://example.com/a", 1)],
            },
            1,
        );
        snapshot.scheduled_retries.push(ScheduledRetry {
            url: "https://example.com/c".to_string(),
            depth: 1,
            attempt: 1,
            action: RetryAction::Retry,
            remaining_secs: 12.5,
        });
        snapshot.retry_counts.insert("https://example.com/c".to_string(), 1);
        snapshot
    }

    #[test]
    fn test_json_round_trip() {
        let snapshot = create_test_snapshot();
        let json = snapshot.to_json().unwrap();
        assert_eq!(CheckpointSnapshot::from_json(&json).unwrap(), snapshot);
    }

    #[test]
    fn test_missing_required_key() {
        let json = r#"{"visited": [], "frontier": [], "checkpoint_time": "2024-01-01T00:00:00Z"}"#;
        assert!(matches!(
            CheckpointSnapshot::from_json(json),
            Err(CheckpointError::MissingField("pages_visited"))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            CheckpointSnapshot::from_json("{not json"),
            Err(CheckpointError::Json(_))
        ));
        assert!(matches!(
            CheckpointSnapshot::from_json("[]"),
            Err(CheckpointError::MissingField("visited"))
        ));
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let json = r#"{
            "visited": ["https://example.com/"],
            "frontier": [{"url": "https://example.com/a", "depth": 1}],
            "pages_visited": 1,
            "checkpoint_time": "2024-01-01T00:00:00Z"
        }"#;
        let snapshot = CheckpointSnapshot::from_json(json).unwrap();
        assert_eq!(snapshot.checkpoint_version, CHECKPOINT_VERSION);
        assert!(snapshot.pending.is_empty());
        assert!(snapshot.rate_controller_state.is_none());
        assert!(snapshot.retry_counts.is_empty());
    }

    #[test]
    fn test_frontier_snapshot_includes_scheduled_retries() {
        let restored = create_test_snapshot().frontier_snapshot();
        let urls: Vec<&str> = restored.frontier.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/b", "https://example.com/c"]);
        assert_eq!(restored.pending.len(), 1);
    }
}
