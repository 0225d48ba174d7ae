//! Crawler coordinator - main crawl orchestration logic
//!
//! The coordinator wires the frontier, rate controller, retry scheduler,
//! checkpoint manager and worker pool together and runs four loops:
//! - result loop: routes each `TaskResult` and refills the task channel
//! - retry loop: requeues URLs whose backoff has expired
//! - watch loop: periodic checkpoints and the termination check
//! - supervisor monitor: worker health and pool size
//!
//! Shutdown moves through `Running -> Draining -> (Forced) -> Stopped` and
//! always ends with a final checkpoint and a `CrawlSummary`.

use crate::checkpoint::{CheckpointManager, CheckpointSnapshot};
use crate::config::Config;
use crate::crawler::channel::{tracked_channel, ChannelDepth, Recv, TrackedReceiver, TrackedSender};
use crate::crawler::frontier::{Completion, Frontier, UrlRecord};
use crate::crawler::retry::{RetryAction, RetryDecision, RetryScheduler};
use crate::crawler::stop::{ShutdownPhase, StopHandle, StopReason};
use crate::crawler::supervisor::{self, Supervisor};
use crate::crawler::worker::{Task, TaskResult, WorkerContext};
use crate::executor::{ErrorKind, ExecutorFactory, HttpExecutorFactory, TaskOutcome};
use crate::output::{sink_from_config, CrawlCounters, CrawlSummary, NullSink, PageSink};
use crate::rate::RateController;
use crate::url::normalize_url;
use crate::SpiderError;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the watch loop logs progress
const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Retry loop sleep when nothing is scheduled; new entries wake it early
const RETRY_IDLE_WAIT: Duration = Duration::from_secs(3600);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by the orchestrator's loops
///
/// Lock order is frontier, then retries. Neither lock is held across an
/// `.await`.
struct CrawlState {
    config: Config,
    config_hash: Option<String>,
    frontier: Mutex<Frontier>,
    retries: Mutex<RetryScheduler>,
    counters: Mutex<CrawlCounters>,
    pages_visited: AtomicU64,
    /// `pages_visited` restored from the checkpoint
    pages_at_start: u64,
    rate: Arc<RateController>,
    tasks: TrackedSender<Task>,
    result_depth: ChannelDepth,
    sink: Arc<dyn PageSink>,
    stop: StopHandle,
    retry_wakeup: Notify,
    rescale: Arc<Notify>,
}

impl CrawlState {
    /// Moves the next batch from the frontier onto the task channel
    fn refill(&self) {
        if self.stop.is_stopped() {
            return;
        }

        let batch = {
            let mut frontier = lock(&self.frontier);
            let n = frontier.refill_size(self.rate.target_workers());
            frontier.dispatch(n)
        };

        for record in batch {
            self.tasks.send(Task::Fetch(record));
        }
    }

    fn handle_result(&self, result: TaskResult) {
        // The frontier's recorded depth wins over the reported one
        let TaskResult {
            url,
            worker_id,
            outcome,
            ..
        } = result;

        tracing::debug!(
            "Result from worker {}: {} ({})",
            worker_id,
            url,
            outcome.label()
        );

        if let Some(signal) = outcome.rate_signal() {
            if let Some(adjustment) = self.rate.register_outcome(signal) {
                if adjustment.forced {
                    tracing::warn!(
                        "Throttling to {} workers, {:.2}s delay: {}",
                        adjustment.target_workers,
                        adjustment.delay.as_secs_f64(),
                        adjustment.reason
                    );
                } else {
                    tracing::info!(
                        "Rate adjusted to {} workers, {:.2}s delay: {}",
                        adjustment.target_workers,
                        adjustment.delay.as_secs_f64(),
                        adjustment.reason
                    );
                }
                self.rescale.notify_one();
            }
        }

        match outcome {
            TaskOutcome::Success { links, payload, .. } => {
                // The page reaches the sink before the frontier lock is
                // released, so any snapshot marking it visited was taken
                // after it was recorded.
                let report = {
                    let mut frontier = lock(&self.frontier);
                    frontier.complete(&url, Completion::Visited).map(|depth| {
                        if let Err(e) = self.sink.record_page(&url, depth, &payload) {
                            tracing::warn!("Failed to record page {}: {}", url, e);
                        }
                        frontier.discover(&links, depth)
                    })
                };
                let Some(report) = report else {
                    self.record_stale(&url);
                    return;
                };

                {
                    let mut counters = lock(&self.counters);
                    counters.pages_succeeded += 1;
                    counters.links_discovered += report.added as u64;
                }
                self.page_completed();
            }
            TaskOutcome::HttpError {
                status,
                classification,
            } => {
                lock(&self.counters).http_errors += 1;
                match classification.action.retry_action() {
                    Some(action) => {
                        tracing::debug!("{} -> HTTP {}: {}", url, status, classification.reason);
                        let retry_after = classification
                            .retry_after
                            .unwrap_or_else(|| self.config.retry.error_retry_after());
                        self.schedule_retry(&url, action, retry_after);
                    }
                    None => self.complete_without_page(&url, &classification.reason),
                }
            }
            TaskOutcome::Skipped { reason } => self.complete_without_page(&url, &reason),
            TaskOutcome::Error { message, kind } => {
                lock(&self.counters).errors += 1;
                match kind {
                    ErrorKind::Transient => {
                        tracing::debug!("Transient error on {}: {}", url, message);
                        self.schedule_retry(
                            &url,
                            RetryAction::RetryOnce,
                            self.config.retry.error_retry_after(),
                        );
                    }
                    ErrorKind::Session => {
                        tracing::warn!("Executor session failed on {}: {}", url, message);
                        self.schedule_retry(
                            &url,
                            RetryAction::Retry,
                            self.config.retry.session_retry_after(),
                        );
                    }
                    ErrorKind::WorkerLost => {
                        lock(&self.counters).lost_tasks += 1;
                        tracing::warn!("Task {} lost with worker {}: {}", url, worker_id, message);
                        self.schedule_retry(
                            &url,
                            RetryAction::Retry,
                            self.config.retry.session_retry_after(),
                        );
                    }
                    ErrorKind::Fatal => {
                        let discarded = lock(&self.frontier)
                            .complete(&url, Completion::Discard)
                            .is_some();
                        if discarded {
                            lock(&self.counters).discarded += 1;
                            tracing::warn!("Discarding {}: {}", url, message);
                        } else {
                            self.record_stale(&url);
                        }
                    }
                }
            }
        }

        self.refill();
    }

    fn complete_without_page(&self, url: &str, reason: &str) {
        if lock(&self.frontier)
            .complete(url, Completion::Visited)
            .is_none()
        {
            self.record_stale(url);
            return;
        }
        lock(&self.counters).pages_skipped += 1;
        tracing::debug!("Skipped {}: {}", url, reason);
        self.page_completed();
    }

    fn schedule_retry(&self, url: &str, action: RetryAction, retry_after: Duration) {
        // The frontier lock stays held until the URL is in the retry heap or
        // in Visited, so a checkpoint never sees it in neither.
        let mut frontier = lock(&self.frontier);
        let Some(depth) = frontier.complete(url, Completion::Retry) else {
            drop(frontier);
            self.record_stale(url);
            return;
        };

        let now = Instant::now();
        let (decision, attempts) = {
            let mut retries = lock(&self.retries);
            let decision = retries.schedule(UrlRecord::new(url, depth), action, retry_after, now);
            (decision, retries.retry_count(url))
        };

        match decision {
            RetryDecision::Scheduled { due, attempt } => {
                drop(frontier);
                lock(&self.counters).retries_scheduled += 1;
                tracing::debug!(
                    "Retry {} of {} in {:.1}s",
                    attempt,
                    url,
                    due.saturating_duration_since(now).as_secs_f64()
                );
                self.retry_wakeup.notify_one();
            }
            RetryDecision::Dropped => {
                frontier.mark_visited(url, depth);
                drop(frontier);
                lock(&self.counters).retries_dropped += 1;
                tracing::warn!("Giving up on {} after {} attempts", url, attempts + 1);
            }
        }
    }

    fn record_stale(&self, url: &str) {
        lock(&self.counters).stale_results += 1;
        tracing::debug!("Ignoring result for {}, no longer pending", url);
    }

    fn page_completed(&self) {
        let pages = self.pages_visited.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.config.crawl.max_pages {
            if pages >= max && self.stop.stop(StopReason::MaxPages) {
                tracing::info!("Reached max pages ({})", max);
            }
        }
    }

    /// Moves due retries back into the frontier
    fn requeue_due(&self, now: Instant) -> usize {
        let mut frontier = lock(&self.frontier);
        let due = lock(&self.retries).pop_due(now);
        due.into_iter()
            .filter(|entry| frontier.requeue(&entry.url, entry.depth))
            .count()
    }

    fn snapshot(&self) -> CheckpointSnapshot {
        let frontier = lock(&self.frontier);
        let mut snapshot =
            CheckpointSnapshot::new(frontier.snapshot(), self.pages_visited.load(Ordering::SeqCst));
        {
            let retries = lock(&self.retries);
            snapshot.retry_counts = retries.retry_counts();
            snapshot.scheduled_retries = retries.scheduled(Instant::now());
        }
        drop(frontier);

        snapshot.rate_controller_state = Some(self.rate.to_checkpoint());
        snapshot.stats = lock(&self.counters).clone();
        snapshot.config_hash = self.config_hash.clone();
        snapshot
    }

    fn maybe_checkpoint(&self, checkpoints: &Mutex<CheckpointManager>) {
        let pages = self.pages_visited.load(Ordering::SeqCst);
        if !lock(checkpoints).should_save(pages, Instant::now()) {
            return;
        }
        let snapshot = self.snapshot();
        if let Err(e) = self.sink.flush() {
            tracing::warn!("Skipping checkpoint, page output could not be flushed: {}", e);
            return;
        }
        if lock(checkpoints).save(&snapshot, false) {
            tracing::info!("Checkpoint saved ({} pages visited)", pages);
        }
    }

    /// True when there is nothing left to do
    ///
    /// The frontier must be drained and unchanged for the grace period, no
    /// retry may be waiting, both channels must be empty and every worker
    /// idle.
    async fn is_finished(&self, supervisor: &tokio::sync::Mutex<Supervisor>) -> bool {
        if self.has_work(Instant::now()) {
            return false;
        }
        if !self.tasks.is_empty() || self.result_depth.get() > 0 {
            return false;
        }
        supervisor.lock().await.all_idle()
    }

    /// Whether the frontier or the retry heap still holds work
    ///
    /// Both are read under the frontier lock; `requeue_due` moves entries
    /// between them under the same lock.
    fn has_work(&self, now: Instant) -> bool {
        let grace = self.config.orchestrator.grace_period();
        let frontier = lock(&self.frontier);
        if !frontier.is_drained() || frontier.idle_for(now) < grace {
            return true;
        }
        !lock(&self.retries).is_empty()
    }

    fn log_progress(&self) {
        let (queued, pending, visited) = {
            let frontier = lock(&self.frontier);
            (frontier.queued_len(), frontier.pending_len(), frontier.visited_len())
        };
        let waiting = lock(&self.retries).len();
        let settings = self.rate.settings();
        tracing::info!(
            "Progress: {} pages visited ({} known visited), {} queued, {} pending, {} awaiting retry, {} workers at {:.2}s delay",
            self.pages_visited.load(Ordering::SeqCst),
            visited,
            queued,
            pending,
            waiting,
            settings.target_workers,
            settings.delay.as_secs_f64()
        );
    }

    fn summary(&self, stop_reason: StopReason, duration: Duration, checkpoint_saved: bool) -> CrawlSummary {
        let (visited_total, queued, pending, depth_excluded) = {
            let frontier = lock(&self.frontier);
            (
                frontier.visited_len(),
                frontier.queued_len(),
                frontier.pending_len(),
                frontier.depth_excluded(),
            )
        };

        CrawlSummary {
            stop_reason,
            pages_visited: self.pages_visited.load(Ordering::SeqCst),
            pages_at_start: self.pages_at_start,
            counters: lock(&self.counters).clone(),
            visited_total,
            queued,
            pending,
            retries_waiting: lock(&self.retries).len(),
            depth_excluded,
            rate: self.rate.stats(),
            final_settings: self.rate.settings(),
            duration,
            checkpoint_saved,
        }
    }
}

async fn result_loop(
    state: Arc<CrawlState>,
    mut results: TrackedReceiver<TaskResult>,
    cancel: CancellationToken,
) -> TrackedReceiver<TaskResult> {
    let poll = state.config.orchestrator.poll_interval();

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = results.recv_timeout(poll) => received,
        };

        match received {
            Recv::Message(result) => state.handle_result(result),
            Recv::Timeout => {}
            Recv::Closed => break,
        }
    }

    results
}

async fn retry_loop(state: Arc<CrawlState>, cancel: CancellationToken) {
    loop {
        let wait = lock(&state.retries)
            .next_due()
            .map_or(RETRY_IDLE_WAIT, |due| due.saturating_duration_since(Instant::now()));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = state.retry_wakeup.notified() => continue,
            _ = tokio::time::sleep(wait) => {}
        }

        let requeued = state.requeue_due(Instant::now());
        if requeued > 0 {
            tracing::debug!("Requeued {} URLs from the retry scheduler", requeued);
            state.refill();
        }
    }
}

async fn watch_loop(
    state: Arc<CrawlState>,
    supervisor: Arc<tokio::sync::Mutex<Supervisor>>,
    checkpoints: Option<Arc<Mutex<CheckpointManager>>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(state.config.orchestrator.poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_progress = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Workers are starved; top the channel up
        if state.tasks.is_empty() {
            state.refill();
        }

        if let Some(checkpoints) = &checkpoints {
            state.maybe_checkpoint(checkpoints);
        }

        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            state.log_progress();
            last_progress = Instant::now();
        }

        if state.is_finished(&supervisor).await {
            tracing::info!("Frontier drained and workers idle, finishing crawl");
            state.stop.stop(StopReason::Completed);
            break;
        }
    }
}

/// Waits for a task until `deadline`, aborting it if the deadline passes
async fn join_with_deadline<T>(
    name: &str,
    mut handle: JoinHandle<T>,
    deadline: tokio::time::Instant,
) -> Option<T> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!("{} task failed: {}", name, e);
            None
        }
        Err(_) => {
            tracing::warn!("{} task missed the shutdown deadline, aborting", name);
            handle.abort();
            None
        }
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Config,
    factory: Arc<dyn ExecutorFactory>,
    sink: Arc<dyn PageSink>,
    config_hash: Option<String>,
    fresh: bool,
    stop: StopHandle,
}

impl Coordinator {
    /// Creates a new coordinator
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `factory` - Builds one `TaskExecutor` per worker
    ///
    /// A config produced by `parse_config` brings its own hash, which
    /// `with_config_hash` can override.
    pub fn new(config: Config, factory: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            config_hash: config.source_hash.clone(),
            config,
            factory,
            sink: Arc::new(NullSink),
            fresh: false,
            stop: StopHandle::new(),
        }
    }

    /// Sends successful pages to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn PageSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Stores the config hash in checkpoints and checks it on resume
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Ignore and delete any existing checkpoint
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    /// Handle for stopping the crawl from outside, e.g. on Ctrl-C
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs the crawl until it completes, hits `max-pages` or is stopped
    ///
    /// Resumes from the checkpoint when one exists (unless `fresh`),
    /// otherwise seeds the frontier with the start URL.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - The crawl ran and shut down
    /// * `Err(SpiderError)` - The start URL is invalid
    pub async fn run(self) -> Result<CrawlSummary, SpiderError> {
        let started = Instant::now();
        let Coordinator {
            config,
            factory,
            sink,
            config_hash,
            fresh,
            stop,
        } = self;

        let checkpoints = config.checkpoint.enabled.then(|| {
            CheckpointManager::new(
                &config.checkpoint.path,
                config.checkpoint.auto_save_interval(),
            )
        });

        let rate = Arc::new(RateController::new(config.rate.clone()));
        let mut frontier = Frontier::new(config.crawl.max_depth);
        let mut retries = RetryScheduler::new(config.retry.max_retries, config.retry.backoff_factor);
        let mut counters = CrawlCounters::default();
        let mut pages_visited = 0;

        let restored = match &checkpoints {
            Some(manager) if fresh => {
                tracing::info!(
                    "Starting fresh crawl, removing checkpoint {}",
                    manager.path().display()
                );
                manager.clear();
                None
            }
            Some(manager) => manager.load(),
            None => None,
        };

        match restored {
            Some(snapshot) => {
                if let (Some(saved), Some(current)) = (&snapshot.config_hash, &config_hash) {
                    if saved != current {
                        tracing::warn!(
                            "Configuration changed since the checkpoint was written ({} -> {})",
                            saved,
                            current
                        );
                    }
                }

                frontier.restore(snapshot.frontier_snapshot());
                retries.restore_counts(snapshot.retry_counts.clone());
                if let Some(saved) = &snapshot.rate_controller_state {
                    rate.restore(saved);
                }
                counters = snapshot.stats.clone();
                pages_visited = snapshot.pages_visited;

                tracing::info!(
                    "Resuming from checkpoint of {}: {} visited, {} queued",
                    snapshot.checkpoint_time,
                    frontier.visited_len(),
                    frontier.queued_len()
                );
            }
            None => {
                let start = normalize_url(&config.crawl.start_url)?;
                frontier.enqueue(start.as_str(), 0);
                tracing::info!("Starting crawl at {}", start);
            }
        }

        let (task_tx, task_rx) = tracked_channel();
        let (result_tx, result_rx) = tracked_channel();
        let rescale = Arc::new(Notify::new());

        let state = Arc::new(CrawlState {
            config: config.clone(),
            config_hash,
            frontier: Mutex::new(frontier),
            retries: Mutex::new(retries),
            counters: Mutex::new(counters),
            pages_visited: AtomicU64::new(pages_visited),
            pages_at_start: pages_visited,
            rate: Arc::clone(&rate),
            tasks: task_tx.clone(),
            result_depth: result_tx.depth(),
            sink,
            stop: stop.clone(),
            retry_wakeup: Notify::new(),
            rescale: Arc::clone(&rescale),
        });

        let ctx = WorkerContext {
            tasks: Arc::new(tokio::sync::Mutex::new(task_rx)),
            results: result_tx.clone(),
            factory,
            rate: Arc::clone(&rate),
            config: config.workers.clone(),
        };
        let supervisor = Arc::new(tokio::sync::Mutex::new(Supervisor::new(ctx, task_tx)));
        supervisor.lock().await.start(rate.target_workers());
        state.refill();

        let checkpoints = checkpoints.map(|manager| Arc::new(Mutex::new(manager)));
        let loops = CancellationToken::new();

        let result_handle = tokio::spawn(result_loop(Arc::clone(&state), result_rx, loops.clone()));
        let background = vec![
            tokio::spawn(retry_loop(Arc::clone(&state), loops.clone())),
            tokio::spawn(watch_loop(
                Arc::clone(&state),
                Arc::clone(&supervisor),
                checkpoints.clone(),
                loops.clone(),
            )),
            tokio::spawn(supervisor::monitor(
                Arc::clone(&supervisor),
                result_tx,
                rescale,
                loops.clone(),
            )),
        ];

        let mut phase = ShutdownPhase::Running;
        stop.stopped().await;
        let reason = stop.reason().unwrap_or(StopReason::Requested);
        tracing::info!("Stopping crawl: {}", reason);

        phase.advance(ShutdownPhase::Draining);
        loops.cancel();
        let deadline = tokio::time::Instant::now() + config.orchestrator.shutdown_deadline();

        let shutdown_timeout = config.workers.shutdown_timeout();
        let pool_stopped = tokio::time::timeout_at(deadline, async {
            supervisor.lock().await.shutdown(shutdown_timeout).await
        })
        .await;
        match pool_stopped {
            Ok(report) if report.aborted > 0 => phase.advance(ShutdownPhase::Forced),
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("Worker pool missed the shutdown deadline");
                phase.advance(ShutdownPhase::Forced);
            }
        }

        let results = join_with_deadline("Result loop", result_handle, deadline).await;

        let aborts: Vec<_> = background.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout_at(deadline, join_all(background)).await {
            Ok(joined) => {
                for outcome in joined {
                    if let Err(e) = outcome {
                        tracing::error!("Background task failed: {}", e);
                    }
                }
            }
            Err(_) => {
                tracing::warn!("Background tasks missed the shutdown deadline, aborting");
                for handle in aborts {
                    handle.abort();
                }
                phase.advance(ShutdownPhase::Forced);
            }
        }

        // Results that arrived while the pool was stopping
        match results {
            Some(mut results) => {
                let mut drained = 0;
                while let Some(result) = results.try_recv() {
                    state.handle_result(result);
                    drained += 1;
                }
                if drained > 0 {
                    tracing::debug!("Processed {} results after stop", drained);
                }
            }
            None => phase.advance(ShutdownPhase::Forced),
        }

        // Page output is flushed before the final checkpoint names those
        // pages as visited.
        if let Err(e) = state.sink.finalize() {
            tracing::warn!("Failed to flush page output: {}", e);
        }

        let mut checkpoint_saved = false;
        if let Some(checkpoints) = &checkpoints {
            let snapshot = state.snapshot();
            let mut manager = lock(checkpoints);
            checkpoint_saved = manager.save(&snapshot, true) || manager.save_emergency(&snapshot);
            if checkpoint_saved {
                tracing::info!("Final checkpoint written to {}", manager.path().display());
            }
        }

        if phase == ShutdownPhase::Forced {
            tracing::warn!("Shutdown was forced; in-flight work stays pending for the next run");
        }
        phase.advance(ShutdownPhase::Stopped);

        let summary = state.summary(reason, started.elapsed(), checkpoint_saved);
        tracing::info!(
            "Crawl stopped ({}): {} pages visited in {:.1}s",
            reason,
            summary.pages_visited,
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }
}

/// Runs a complete crawl with the HTTP executor
///
/// Builds the reqwest-based executor factory and the configured page sink,
/// then runs a `Coordinator`.
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `fresh` - Ignore and delete any existing checkpoint
pub async fn run_crawl(config: Config, fresh: bool) -> Result<CrawlSummary, SpiderError> {
    let factory = HttpExecutorFactory::from_config(&config)?;
    let sink = sink_from_config(&config.output, !fresh)?;
    Coordinator::new(config, Arc::new(factory))
        .with_sink(sink)
        .fresh(fresh)
        .run()
        .await
}
