//! Retry and backoff scheduling
//!
//! All retry decisions are made here. Failed URLs are held in a single
//! min-heap keyed by due time and serviced by one loop in the orchestrator.

use crate::crawler::frontier::UrlRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// Upper bound on a single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry policy attached to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAction {
    Retry,
    RetryOnce,
    ThrottleAndRetry,
}

/// A URL waiting for its backoff to expire
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub url: String,
    pub depth: u32,
    /// 1-based attempt number this retry will be
    pub attempt: u32,
    pub due: Instant,
    pub action: RetryAction,
}

// Earliest due time pops first from the max-heap
impl Ord for RetryEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.url.cmp(&self.url))
    }
}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RetryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.url == other.url
    }
}

impl Eq for RetryEntry {}

/// Outcome of asking the scheduler to retry a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled { due: Instant, attempt: u32 },
    /// Retry budget exhausted; the caller marks the URL visited
    Dropped,
}

/// Persisted form of a scheduled retry; the due time is stored as the
/// remaining delay in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRetry {
    pub url: String,
    pub depth: u32,
    pub attempt: u32,
    pub action: RetryAction,
    pub remaining_secs: f64,
}

#[derive(Debug)]
pub struct RetryScheduler {
    heap: BinaryHeap<RetryEntry>,
    counts: HashMap<String, u32>,
    max_retries: u32,
    backoff_factor: f64,
}

impl RetryScheduler {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            heap: BinaryHeap::new(),
            counts: HashMap::new(),
            max_retries,
            backoff_factor,
        }
    }

    /// Decides whether a failed URL gets another attempt
    ///
    /// # Arguments
    ///
    /// * `retry_after` - Base delay before the first retry
    /// * `now` - The current time instant
    ///
    /// # Returns
    ///
    /// `Scheduled` with the due time, or `Dropped` if the per-URL cap is
    /// reached or a `RetryOnce` URL fails a second time.
    pub fn schedule(
        &mut self,
        record: UrlRecord,
        action: RetryAction,
        retry_after: Duration,
        now: Instant,
    ) -> RetryDecision {
        let previous = self.counts.get(&record.url).copied().unwrap_or(0);

        if previous >= self.max_retries {
            tracing::debug!(
                "Retry budget exhausted for {} after {} attempts",
                record.url,
                previous
            );
            return RetryDecision::Dropped;
        }

        if action == RetryAction::RetryOnce && previous > 0 {
            tracing::debug!("Second failure for retry-once URL {}", record.url);
            return RetryDecision::Dropped;
        }

        let attempt = previous + 1;
        self.counts.insert(record.url.clone(), attempt);

        let due = now + self.backoff(retry_after, previous);
        self.heap.push(RetryEntry {
            url: record.url,
            depth: record.depth,
            attempt,
            due,
            action,
        });

        RetryDecision::Scheduled { due, attempt }
    }

    /// `retry_after * backoff_factor^previous_attempts`, capped at one day
    pub fn backoff(&self, retry_after: Duration, previous_attempts: u32) -> Duration {
        let factor = self.backoff_factor.powi(previous_attempts as i32);
        Duration::try_from_secs_f64(retry_after.as_secs_f64() * factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Removes and returns every entry due at or before `now`
    pub fn pop_due(&mut self, now: Instant) -> Vec<RetryEntry> {
        let mut due = Vec::new();
        while self.heap.peek().map_or(false, |e| e.due <= now) {
            if let Some(entry) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    /// Due time of the earliest entry
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.due)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn retry_count(&self, url: &str) -> u32 {
        self.counts.get(url).copied().unwrap_or(0)
    }

    pub fn retry_counts(&self) -> HashMap<String, u32> {
        self.counts.clone()
    }

    pub fn restore_counts(&mut self, counts: HashMap<String, u32>) {
        self.counts = counts;
    }

    /// Scheduled entries relative to `now`, soonest first
    pub fn scheduled(&self, now: Instant) -> Vec<ScheduledRetry> {
        let mut entries: Vec<&RetryEntry> = self.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
            .into_iter()
            .map(|e| ScheduledRetry {
                url: e.url.clone(),
                depth: e.depth,
                attempt: e.attempt,
                action: e.action,
                remaining_secs: e.due.saturating_duration_since(now).as_secs_f64(),
            })
            .collect()
    }
}
