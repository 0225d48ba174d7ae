//! URL frontier and dedup cache
//!
//! Every URL the crawl knows about is in exactly one of three sets:
//! - Frontier: discovered, waiting for dispatch (FIFO)
//! - Pending: dispatched to a worker, waiting for a result
//! - Visited: done, never dispatched again
//!
//! The dedup cache maps each known URL to its depth and always equals the
//! union of the three sets. All mutations go through `Frontier`'s methods,
//! and the orchestrator keeps the whole structure behind a single lock.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// A URL together with its link depth from the seed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub depth: u32,
}

impl UrlRecord {
    pub fn new(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            depth,
        }
    }
}

/// How a pending URL left the Pending set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Success or permanent skip
    Visited,
    /// Transient failure; the retry scheduler takes ownership
    Retry,
    /// Hard error; forgotten so it may be rediscovered later
    Discard,
}

/// Counts from a batch of discovered links
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub added: usize,
    pub duplicates: usize,
    pub beyond_depth: usize,
}

/// Owned copy of the frontier's contents for checkpoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontierSnapshot {
    pub visited: Vec<String>,
    pub frontier: Vec<UrlRecord>,
    pub pending: Vec<UrlRecord>,
}

#[derive(Debug)]
pub struct Frontier {
    queue: VecDeque<UrlRecord>,
    pending: HashMap<String, u32>,
    visited: HashSet<String>,
    cache: HashMap<String, u32>,
    max_depth: Option<u32>,
    depth_excluded: u64,
    last_change: Instant,
}

impl Frontier {
    pub fn new(max_depth: Option<u32>) -> Self {
        Self {
            queue: VecDeque::new(),
            pending: HashMap::new(),
            visited: HashSet::new(),
            cache: HashMap::new(),
            max_depth,
            depth_excluded: 0,
            last_change: Instant::now(),
        }
    }

    /// Adds a URL to the back of the frontier
    ///
    /// # Returns
    ///
    /// * `true` - The URL was new and is now queued
    /// * `false` - The URL is already known (queued, pending or visited)
    pub fn enqueue(&mut self, url: &str, depth: u32) -> bool {
        if self.cache.contains_key(url) {
            return false;
        }
        self.cache.insert(url.to_string(), depth);
        self.queue.push_back(UrlRecord::new(url, depth));
        self.touch();
        true
    }

    /// Enqueues links found on a page at `parent_depth`
    ///
    /// Links past the depth limit are dropped and counted.
    pub fn discover<I, S>(&mut self, links: I, parent_depth: u32) -> DiscoveryReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let depth = parent_depth.saturating_add(1);
        let mut report = DiscoveryReport::default();

        for link in links {
            let link = link.as_ref();
            if self.max_depth.map_or(false, |max| depth > max) {
                if !self.cache.contains_key(link) {
                    report.beyond_depth += 1;
                }
                continue;
            }
            if self.enqueue(link, depth) {
                report.added += 1;
            } else {
                report.duplicates += 1;
            }
        }

        self.depth_excluded += report.beyond_depth as u64;
        report
    }

    /// Moves up to `n` URLs from the frontier to pending
    pub fn dispatch(&mut self, n: usize) -> Vec<UrlRecord> {
        let mut batch = Vec::with_capacity(n.min(self.queue.len()));

        while batch.len() < n {
            let Some(record) = self.queue.pop_front() else {
                break;
            };
            if self.visited.contains(&record.url) || self.pending.contains_key(&record.url) {
                continue;
            }
            self.pending.insert(record.url.clone(), record.depth);
            batch.push(record);
        }

        if !batch.is_empty() {
            self.touch();
        }
        batch
    }

    /// Batch size for the next refill given the current worker target
    pub fn refill_size(&self, target_workers: usize) -> usize {
        (2 * target_workers).saturating_sub(self.pending.len()).max(1)
    }

    /// Resolves a pending URL
    ///
    /// # Returns
    ///
    /// * `Some(depth)` - The URL was pending and has been moved
    /// * `None` - The URL was not pending (stale or duplicate result)
    pub fn complete(&mut self, url: &str, completion: Completion) -> Option<u32> {
        let depth = self.pending.remove(url)?;
        match completion {
            Completion::Visited => {
                self.visited.insert(url.to_string());
            }
            Completion::Retry | Completion::Discard => {
                self.cache.remove(url);
            }
        }
        self.touch();
        Some(depth)
    }

    /// Forces a URL into Visited, wherever it currently is
    pub fn mark_visited(&mut self, url: &str, depth: u32) {
        self.pending.remove(url);
        self.queue.retain(|r| r.url != url);
        self.visited.insert(url.to_string());
        self.cache.entry(url.to_string()).or_insert(depth);
        self.touch();
    }

    /// Re-enters a URL coming back from the retry scheduler
    ///
    /// Returns false if the URL reappeared in any set while it was waiting.
    pub fn requeue(&mut self, url: &str, depth: u32) -> bool {
        if self.visited.contains(url) || self.pending.contains_key(url) {
            return false;
        }
        self.enqueue(url, depth)
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.pending.is_empty()
    }

    pub fn is_known(&self, url: &str) -> bool {
        self.cache.contains_key(url)
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    pub fn is_pending(&self, url: &str) -> bool {
        self.pending.contains_key(url)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    pub fn depth_excluded(&self) -> u64 {
        self.depth_excluded
    }

    /// Time since the last mutation
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_change)
    }

    pub fn snapshot(&self) -> FrontierSnapshot {
        let mut pending: Vec<UrlRecord> = self
            .pending
            .iter()
            .map(|(url, depth)| UrlRecord::new(url.clone(), *depth))
            .collect();
        pending.sort_by(|a, b| a.url.cmp(&b.url));

        let mut visited: Vec<String> = self.visited.iter().cloned().collect();
        visited.sort();

        FrontierSnapshot {
            visited,
            frontier: self.queue.iter().cloned().collect(),
            pending,
        }
    }

    /// Rebuilds the frontier from a checkpoint
    ///
    /// URLs that were pending at save time go to the front of the queue so
    /// in-flight work is attempted first. The cache is rebuilt from Visited
    /// and the new queue.
    pub fn restore(&mut self, snapshot: FrontierSnapshot) {
        self.queue.clear();
        self.pending.clear();
        self.visited.clear();
        self.cache.clear();

        for url in snapshot.visited {
            self.cache.entry(url.clone()).or_insert(0);
            self.visited.insert(url);
        }

        for record in snapshot.pending.into_iter().chain(snapshot.frontier) {
            if self.cache.contains_key(&record.url) {
                continue;
            }
            self.cache.insert(record.url.clone(), record.depth);
            self.queue.push_back(record);
        }

        self.touch();
    }

    fn touch(&mut self) {
        self.last_change = Instant::now();
    }

    /// Checks the exclusivity and cache invariants
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut union: HashSet<&str> = HashSet::new();
        for record in &self.queue {
            assert!(union.insert(&record.url), "duplicate in queue: {}", record.url);
        }
        for url in self.pending.keys() {
            assert!(union.insert(url), "pending overlaps: {}", url);
        }
        for url in &self.visited {
            assert!(union.insert(url), "visited overlaps: {}", url);
        }
        let cached: HashSet<&str> = self.cache.keys().map(|k| k.as_str()).collect();
        assert_eq!(union, cached, "cache does not match the three sets");
    }
}
