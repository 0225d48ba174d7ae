//! Crawl counters and the end-of-run summary
//!
//! `CrawlCounters` is updated by the orchestrator's result loop and stored
//! in checkpoints so totals survive a resume; they are cumulative across
//! runs. `CrawlSummary` is built once at shutdown and printed by the binary.

use crate::crawler::StopReason;
use crate::state::{RateSettings, RateStats};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Running totals kept by the result loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlCounters {
    /// Results that delivered a page
    pub pages_succeeded: u64,
    /// Results marked visited without a page (skips, permanent HTTP errors)
    pub pages_skipped: u64,
    /// HTTP error results of any action
    pub http_errors: u64,
    /// Executor error results of any kind
    pub errors: u64,
    pub retries_scheduled: u64,
    /// URLs forced into Visited after exhausting their retries
    pub retries_dropped: u64,
    /// URLs forgotten after a fatal error
    pub discarded: u64,
    pub lost_tasks: u64,
    pub links_discovered: u64,
    /// Results for URLs that were no longer pending
    pub stale_results: u64,
}

/// Final report of a crawl
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub stop_reason: StopReason,
    /// Pages completed over the whole crawl, including earlier runs
    pub pages_visited: u64,
    /// Pages already completed when this run resumed
    pub pages_at_start: u64,
    /// Totals over the whole crawl, including earlier runs
    pub counters: CrawlCounters,
    /// Size of the Visited set, including dropped URLs
    pub visited_total: usize,
    pub queued: usize,
    pub pending: usize,
    pub retries_waiting: usize,
    pub depth_excluded: u64,
    pub rate: RateStats,
    pub final_settings: RateSettings,
    pub duration: Duration,
    pub checkpoint_saved: bool,
}

impl CrawlSummary {
    /// Share of requests that succeeded, as a percentage
    pub fn success_rate(&self) -> f64 {
        self.rate.success_rate() * 100.0
    }

    /// Share of requests that failed, as a percentage
    pub fn error_rate(&self) -> f64 {
        self.rate.error_rate() * 100.0
    }

    /// Share of requests the server rate limited, as a percentage
    pub fn rate_limited_rate(&self) -> f64 {
        self.rate.rate_limited_rate() * 100.0
    }

    /// Pages completed by this run alone
    pub fn pages_this_run(&self) -> u64 {
        self.pages_visited.saturating_sub(self.pages_at_start)
    }

    /// Throughput of this run; `duration` only covers this run
    pub fn pages_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.pages_this_run() as f64 / secs
    }

    /// True when nothing was left to crawl
    pub fn is_complete(&self) -> bool {
        self.queued == 0 && self.pending == 0 && self.retries_waiting == 0
    }
}

/// Prints the summary to stdout
pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Crawl Summary ===\n");

    println!("Run:");
    println!("  Stopped: {}", summary.stop_reason);
    println!("  Duration: {:.1}s", summary.duration.as_secs_f64());
    println!(
        "  Throughput: {:.2} pages/sec",
        summary.pages_per_second()
    );
    if summary.checkpoint_saved {
        println!("  Checkpoint: saved");
    }
    println!();

    println!("Pages (all runs):");
    println!(
        "  Visited: {} ({} this run)",
        summary.pages_visited,
        summary.pages_this_run()
    );
    println!("  Succeeded: {}", summary.counters.pages_succeeded);
    println!("  Skipped: {}", summary.counters.pages_skipped);
    println!("  Links discovered: {}", summary.counters.links_discovered);
    println!("  Beyond max depth: {}", summary.depth_excluded);
    println!(
        "  Remaining: {} queued, {} pending, {} awaiting retry",
        summary.queued, summary.pending, summary.retries_waiting
    );
    println!();

    let c = &summary.counters;
    if c.errors + c.http_errors + c.lost_tasks > 0 {
        println!("Failures (all runs):");
        println!("  HTTP errors: {}", c.http_errors);
        println!("  Executor errors: {}", c.errors);
        println!("  Lost with a worker: {}", c.lost_tasks);
        println!("  Retries scheduled: {}", c.retries_scheduled);
        println!("  Dropped after retries: {}", c.retries_dropped);
        println!("  Discarded: {}", c.discarded);
        println!();
    }

    println!("Rate control:");
    println!(
        "  Final: {} workers, {:.2}s delay, recovery {}",
        summary.final_settings.target_workers,
        summary.final_settings.delay.as_secs_f64(),
        summary.final_settings.recovery_level
    );
    println!("  Adjustments: {}", summary.rate.adjustments_made);
    if !summary.rate.last_adjustment_reason.is_empty() {
        println!("  Last adjustment: {}", summary.rate.last_adjustment_reason);
    }
    println!();

    println!(
        "Success Rate: {:.1}% (errors {:.1}%, rate limited {:.1}%) over {} requests",
        summary.success_rate(),
        summary.error_rate(),
        summary.rate_limited_rate(),
        summary.rate.total_requests
    );
}
