//! Crawl worker task
//!
//! Each worker is a tokio task that pulls URLs from the shared task channel,
//! waits out the rate controller's delay, runs the URL through its own
//! `TaskExecutor` and reports exactly one `TaskResult` per task.
//!
//! Workers never decide about retries. Executor failures are translated into
//! tagged error outcomes and the orchestrator routes them.

use crate::config::WorkerConfig;
use crate::crawler::channel::{Recv, TrackedReceiver, TrackedSender};
use crate::crawler::frontier::UrlRecord;
use crate::executor::{ErrorKind, ExecutorError, ExecutorFactory, TaskExecutor, TaskOutcome};
use crate::rate::RateController;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Wait before the first executor re-creation; grows linearly per attempt
const EXECUTOR_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A message on the task channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Fetch(UrlRecord),
    /// Sentinel telling one worker to exit
    Shutdown,
}

/// A message on the result channel
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub url: String,
    pub depth: u32,
    pub worker_id: usize,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Crashed,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Busy,
            _ => WorkerState::Crashed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Busy => 1,
            WorkerState::Crashed => 2,
        }
    }
}

/// Health fields a worker publishes for its supervisor
///
/// Only the owning worker writes these, except `mark_crashed` and
/// `take_current` which the supervisor uses after the worker is gone.
#[derive(Debug)]
pub struct WorkerStatus {
    epoch: Instant,
    state: AtomicU8,
    /// Milliseconds since `epoch`
    last_activity: AtomicU64,
    urls_processed: AtomicU64,
    error_count: AtomicU64,
    current: Mutex<Option<UrlRecord>>,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStatus {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: AtomicU8::new(WorkerState::Idle.as_u8()),
            last_activity: AtomicU64::new(0),
            urls_processed: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<UrlRecord>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_busy(&self) -> bool {
        self.state() == WorkerState::Busy
    }

    pub fn urls_processed(&self) -> u64 {
        self.urls_processed.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn last_activity(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_activity.load(Ordering::SeqCst))
    }

    /// Time since the worker last reported activity
    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn current_task(&self) -> Option<UrlRecord> {
        self.current().clone()
    }

    pub fn heartbeat(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_activity.store(elapsed, Ordering::SeqCst);
    }

    pub(crate) fn begin(&self, record: &UrlRecord) {
        *self.current() = Some(record.clone());
        self.state.store(WorkerState::Busy.as_u8(), Ordering::SeqCst);
        self.heartbeat();
    }

    pub(crate) fn finish(&self, failed: bool) {
        self.urls_processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        *self.current() = None;
        self.state.store(WorkerState::Idle.as_u8(), Ordering::SeqCst);
        self.heartbeat();
    }

    pub fn mark_crashed(&self) {
        self.state.store(WorkerState::Crashed.as_u8(), Ordering::SeqCst);
    }

    /// Removes the in-flight task of a worker that is gone
    pub fn take_current(&self) -> Option<UrlRecord> {
        self.current().take()
    }
}

/// Everything a worker shares with the rest of the pool
#[derive(Clone)]
pub struct WorkerContext {
    pub tasks: Arc<tokio::sync::Mutex<TrackedReceiver<Task>>>,
    pub results: TrackedSender<TaskResult>,
    pub factory: Arc<dyn ExecutorFactory>,
    pub rate: Arc<RateController>,
    pub config: WorkerConfig,
}

pub(crate) struct Worker {
    id: usize,
    ctx: WorkerContext,
    status: Arc<WorkerStatus>,
    cancel: CancellationToken,
    executor: Option<Box<dyn TaskExecutor>>,
    restarts: u32,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        ctx: WorkerContext,
        status: Arc<WorkerStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            ctx,
            status,
            cancel,
            executor: None,
            restarts: 0,
        }
    }

    /// Runs until cancelled, told to shut down, or out of executor restarts
    pub(crate) async fn run(mut self) {
        tracing::debug!("Worker {} started", self.id);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.status.heartbeat();

            let received = {
                let tasks = Arc::clone(&self.ctx.tasks);
                let idle_poll = self.ctx.config.idle_poll();
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    received = async move { tasks.lock().await.recv_timeout(idle_poll).await } => received,
                }
            };

            let record = match received {
                Recv::Message(Task::Fetch(record)) => record,
                Recv::Message(Task::Shutdown) => {
                    tracing::debug!("Worker {} received shutdown sentinel", self.id);
                    break;
                }
                Recv::Timeout => continue,
                Recv::Closed => break,
            };

            self.status.begin(&record);

            let delay = self.ctx.rate.current_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let (outcome, exhausted) = self.process(&record).await;
            let failed = matches!(
                outcome,
                TaskOutcome::Error { .. } | TaskOutcome::HttpError { .. }
            );

            tracing::debug!(
                "Worker {} finished {} ({})",
                self.id,
                record.url,
                outcome.label()
            );

            // The result goes out before the in-flight slot is cleared, so a
            // worker lost in between is reported twice rather than never.
            self.ctx.results.send(TaskResult {
                url: record.url,
                depth: record.depth,
                worker_id: self.id,
                outcome,
            });
            self.status.finish(failed);

            if exhausted {
                tracing::error!(
                    "Worker {} exceeded {} executor restarts, exiting",
                    self.id,
                    self.ctx.config.max_restarts
                );
                break;
            }
        }

        self.close_executor().await;
        tracing::debug!("Worker {} stopped", self.id);
    }

    /// Executes one task
    ///
    /// # Returns
    ///
    /// The outcome to report and whether the worker has run out of executor
    /// restarts and must exit.
    async fn process(&mut self, record: &UrlRecord) -> (TaskOutcome, bool) {
        let result = match self.executor().await {
            Ok(executor) => executor.execute(&record.url, record.depth).await,
            Err(e) => {
                return (
                    TaskOutcome::error(format!("Executor unavailable: {}", e), ErrorKind::Fatal),
                    true,
                );
            }
        };

        match result {
            Ok(outcome) => (outcome, false),
            Err(ExecutorError::Session(message)) | Err(ExecutorError::Init(message)) => {
                tracing::warn!("Worker {} executor session failed: {}", self.id, message);
                self.close_executor().await;
                self.restarts += 1;
                let exhausted = self.restarts > self.ctx.config.max_restarts;
                (TaskOutcome::error(message, ErrorKind::Session), exhausted)
            }
            Err(ExecutorError::Other(message)) => {
                (TaskOutcome::error(message, ErrorKind::Transient), false)
            }
        }
    }

    /// Returns the worker's executor, creating it on first use
    async fn executor(&mut self) -> Result<&dyn TaskExecutor, ExecutorError> {
        while self.executor.is_none() {
            match self.ctx.factory.create(self.id).await {
                Ok(executor) => self.executor = Some(executor),
                Err(e) => {
                    self.restarts += 1;
                    if self.restarts > self.ctx.config.max_restarts {
                        return Err(e);
                    }
                    let wait = EXECUTOR_RETRY_DELAY * self.restarts;
                    tracing::warn!(
                        "Worker {} failed to create executor (attempt {}), retrying in {:?}: {}",
                        self.id,
                        self.restarts,
                        wait,
                        e
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }

        self.executor
            .as_deref()
            .ok_or_else(|| ExecutorError::Init("executor missing after creation".to_string()))
    }

    async fn close_executor(&mut self) {
        if let Some(executor) = self.executor.take() {
            executor.close().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RateConfig;
    use crate::crawler::channel::tracked_channel;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Executor factory whose executors follow a fixed script per URL
    pub(crate) struct ScriptedFactory {
        pub created: AtomicUsize,
        pub fail_create: usize,
        pub session_failures: Arc<AtomicUsize>,
    }

    impl ScriptedFactory {
        pub(crate) fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                fail_create: 0,
                session_failures: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct ScriptedExecutor {
        session_failures: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        async fn execute(&self, url: &str, _depth: u32) -> Result<TaskOutcome, ExecutorError> {
            if url.contains("session") {
                self.session_failures.fetch_add(1, Ordering::SeqCst);
                return Err(ExecutorError::Session("browser crashed".to_string()));
            }
            if url.contains("other") {
                return Err(ExecutorError::Other("odd failure".to_string()));
            }
            Ok(TaskOutcome::Success {
                links: vec![],
                payload: serde_json::Value::Null,
                http_status: Some(200),
            })
        }
    }

    #[async_trait]
    impl ExecutorFactory for ScriptedFactory {
        async fn create(&self, _worker_id: usize) -> Result<Box<dyn TaskExecutor>, ExecutorError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_create {
                return Err(ExecutorError::Init("no browser".to_string()));
            }
            Ok(Box::new(ScriptedExecutor {
                session_failures: Arc::clone(&self.session_failures),
            }))
        }
    }

    pub(crate) fn zero_delay_rate() -> Arc<RateController> {
        Arc::new(RateController::new(RateConfig {
            initial_delay: 0.0,
            min_delay: 0.0,
            max_delay: 0.0,
            ..RateConfig::default()
        }))
    }

    fn test_worker_config(max_restarts: u32) -> WorkerConfig {
        WorkerConfig {
            idle_poll: 0.02,
            max_restarts,
            ..WorkerConfig::default()
        }
    }

    struct Harness {
        tasks: TrackedSender<Task>,
        results: TrackedReceiver<TaskResult>,
        status: Arc<WorkerStatus>,
        cancel: CancellationToken,
        join: tokio::task::JoinHandle<()>,
    }

    fn spawn_worker(factory: Arc<ScriptedFactory>, max_restarts: u32) -> Harness {
        let (task_tx, task_rx) = tracked_channel();
        let (result_tx, result_rx) = tracked_channel();
        let ctx = WorkerContext {
            tasks: Arc::new(tokio::sync::Mutex::new(task_rx)),
            results: result_tx,
            factory,
            rate: zero_delay_rate(),
            config: test_worker_config(max_restarts),
        };
        let status = Arc::new(WorkerStatus::new());
        let cancel = CancellationToken::new();
        let worker = Worker::new(1, ctx, Arc::clone(&status), cancel.clone());
        Harness {
            tasks: task_tx,
            results: result_rx,
            status,
            cancel,
            join: tokio::spawn(worker.run()),
        }
    }

    async fn next_result(results: &mut TrackedReceiver<TaskResult>) -> TaskResult {
        match results.recv_timeout(Duration::from_secs(5)).await {
            Recv::Message(result) => result,
            other => panic!("no result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_one_result_per_task() {
        let factory = Arc::new(ScriptedFactory::new());
        let mut h = spawn_worker(Arc::clone(&factory), 3);

        h.tasks.send(Task::Fetch(UrlRecord::new("https://example.com/a", 0)));
        h.tasks.send(Task::Fetch(UrlRecord::new("https://example.com/b", 1)));

        let first = next_result(&mut h.results).await;
        let second = next_result(&mut h.results).await;
        assert_eq!(first.url, "https://example.com/a");
        assert_eq!(second.depth, 1);
        assert!(matches!(first.outcome, TaskOutcome::Success { .. }));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        h.tasks.send(Task::Shutdown);
        h.join.await.unwrap();
        assert_eq!(h.status.urls_processed(), 2);
        assert_eq!(h.status.current_task(), None);
        assert!(h.results.is_empty());
    }

    #[tokio::test]
    async fn test_session_error_recreates_executor() {
        let factory = Arc::new(ScriptedFactory::new());
        let mut h = spawn_worker(Arc::clone(&factory), 3);

        h.tasks.send(Task::Fetch(UrlRecord::new("https://example.com/session", 0)));
        let result = next_result(&mut h.results).await;
        assert!(matches!(
            result.outcome,
            TaskOutcome::Error {
                kind: ErrorKind::Session,
                ..
            }
        ));

        h.tasks.send(Task::Fetch(UrlRecord::new("https://example.com/ok", 0)));
        let result = next_result(&mut h.results).await;
        assert!(matches!(result.outcome, TaskOutcome::Success { .. }));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(h.status.error_count(), 1);

        h.cancel.cancel();
        h.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_other_error_is_transient() {
        let mut h = spawn_worker(Arc::new(ScriptedFactory::new()), 3);
        h.tasks.send(Task::Fetch(UrlRecord::new("https://example.com/other", 0)));
        let result = next_result(&mut h.results).await;
        assert!(matches!(
            result.outcome,
            TaskOutcome::Error {
                kind: ErrorKind::Transient,
                ..
            }
        ));
        h.cancel.cancel();
        h.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_restarts_report_fatal_and_exit() {
        let mut factory = ScriptedFactory::new();
        factory.fail_create = usize::MAX;
        let factory = Arc::new(factory);
        let mut h = spawn_worker(Arc::clone(&factory), 2);

        let started = Instant::now();
        h.tasks.send(Task::Fetch(UrlRecord::new("https://example.com/a", 0)));
        let result = next_result(&mut h.results).await;

        // Three attempts with 100ms and 200ms pauses in between
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(matches!(
            result.outcome,
            TaskOutcome::Error {
                kind: ErrorKind::Fatal,
                ..
            }
        ));

        // The worker exits on its own; no sentinel needed
        tokio::time::timeout(Duration::from_secs(5), h.join)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_executor_creation_is_retried_after_a_pause() {
        let mut factory = ScriptedFactory::new();
        factory.fail_create = 1;
        let factory = Arc::new(factory);
        let mut h = spawn_worker(Arc::clone(&factory), 3);

        let started = Instant::now();
        h.tasks.send(Task::Fetch(UrlRecord::new("https://example.com/a", 0)));
        let result = next_result(&mut h.results).await;

        assert!(matches!(result.outcome, TaskOutcome::Success { .. }));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= EXECUTOR_RETRY_DELAY);

        h.cancel.cancel();
        h.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_worker() {
        let h = spawn_worker(Arc::new(ScriptedFactory::new()), 3);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.status.state(), WorkerState::Idle);

        h.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), h.join)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_status_bookkeeping() {
        let status = WorkerStatus::new();
        let record = UrlRecord::new("https://example.com/x", 2);

        status.begin(&record);
        assert!(status.is_busy());
        assert_eq!(status.current_task(), Some(record.clone()));

        let later = Instant::now() + Duration::from_secs(200);
        assert!(status.silent_for(later) >= Duration::from_secs(199));

        status.mark_crashed();
        assert_eq!(status.state(), WorkerState::Crashed);
        assert_eq!(status.take_current(), Some(record));
        assert_eq!(status.take_current(), None);
    }
}
