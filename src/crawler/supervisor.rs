//! Worker pool supervision
//!
//! The supervisor owns the worker handles. It:
//! - spawns workers and keeps the pool at the rate controller's target
//! - retires surplus workers cooperatively, idle ones first
//! - detects workers that died or stopped responding and hands their
//!   in-flight task back to the orchestrator
//! - shuts the pool down with sentinels, then cancellation, then abort

use crate::crawler::channel::TrackedSender;
use crate::crawler::frontier::UrlRecord;
use crate::crawler::worker::{Task, TaskResult, Worker, WorkerContext, WorkerStatus};
use crate::executor::{ErrorKind, TaskOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Extra sentinels sent on shutdown, for workers spawned during the race
const SPARE_SENTINELS: usize = 2;

pub struct WorkerHandle {
    pub id: usize,
    pub status: Arc<WorkerStatus>,
    join: JoinHandle<()>,
    cancel: CancellationToken,
}

/// A task held by a worker that died or hung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostTask {
    pub worker_id: usize,
    pub record: UrlRecord,
    pub reason: String,
}

impl LostTask {
    pub fn into_result(self) -> TaskResult {
        TaskResult {
            url: self.record.url,
            depth: self.record.depth,
            worker_id: self.worker_id,
            outcome: TaskOutcome::error(self.reason, ErrorKind::WorkerLost),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub spawned: usize,
    pub retired: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub aborted: usize,
}

pub struct Supervisor {
    ctx: WorkerContext,
    sentinels: TrackedSender<Task>,
    workers: Vec<WorkerHandle>,
    /// Cancelled workers still finishing their current task
    retiring: Vec<WorkerHandle>,
    root: CancellationToken,
    next_id: usize,
    heartbeat_timeout: Duration,
}

impl Supervisor {
    /// Creates an empty pool
    ///
    /// # Arguments
    ///
    /// * `ctx` - Channels, executor factory and settings shared by every worker
    /// * `sentinels` - Sender side of the task channel, used for shutdown
    pub fn new(ctx: WorkerContext, sentinels: TrackedSender<Task>) -> Self {
        let heartbeat_timeout = ctx.config.heartbeat_timeout();
        Self {
            ctx,
            sentinels,
            workers: Vec::new(),
            retiring: Vec::new(),
            root: CancellationToken::new(),
            next_id: 0,
            heartbeat_timeout,
        }
    }

    pub fn start(&mut self, n: usize) {
        for _ in 0..n {
            self.spawn_worker();
        }
        tracing::info!("Started {} workers", n);
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let status = Arc::new(WorkerStatus::new());
        let cancel = self.root.child_token();
        let worker = Worker::new(id, self.ctx.clone(), Arc::clone(&status), cancel.clone());

        self.workers.push(WorkerHandle {
            id,
            status,
            join: tokio::spawn(worker.run()),
            cancel,
        });
    }

    /// Number of workers in the active pool
    pub fn alive_count(&self) -> usize {
        self.workers.len()
    }

    /// True when no worker, active or retiring, holds a task
    pub fn all_idle(&self) -> bool {
        self.workers
            .iter()
            .chain(self.retiring.iter())
            .all(|w| !w.status.is_busy())
    }

    /// Brings the pool to `target` workers
    pub fn reconcile(&mut self, target: usize) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let alive = self.workers.len();

        if alive < target {
            for _ in alive..target {
                self.spawn_worker();
                report.spawned += 1;
            }
            tracing::info!("Scaled workers up {} -> {}", alive, target);
        } else if alive > target {
            // Idle workers sort first
            self.workers.sort_by_key(|w| w.status.is_busy());
            let surplus: Vec<WorkerHandle> = self.workers.drain(..alive - target).collect();
            for handle in surplus {
                handle.cancel.cancel();
                self.retiring.push(handle);
                report.retired += 1;
            }
            tracing::info!("Scaled workers down {} -> {}", alive, target);
        }

        report
    }

    /// Removes dead or unresponsive workers
    ///
    /// A worker counts as lost when its task has ended without being
    /// retired, or when it has been busy without a heartbeat for longer than
    /// the heartbeat timeout. Hung workers are aborted.
    ///
    /// # Returns
    ///
    /// The in-flight tasks of the lost workers.
    pub fn health_check(&mut self, now: Instant) -> Vec<LostTask> {
        let mut lost = Vec::new();
        let timeout = self.heartbeat_timeout;

        let mut kept = Vec::with_capacity(self.workers.len());
        for handle in self.workers.drain(..) {
            match check_worker(&handle, now, timeout) {
                Some(reason) => {
                    tracing::warn!("Worker {} lost: {}", handle.id, reason);
                    handle.status.mark_crashed();
                    handle.cancel.cancel();
                    handle.join.abort();
                    if let Some(record) = handle.status.take_current() {
                        lost.push(LostTask {
                            worker_id: handle.id,
                            record,
                            reason,
                        });
                    }
                }
                None => kept.push(handle),
            }
        }
        self.workers = kept;

        let mut still_retiring = Vec::with_capacity(self.retiring.len());
        for handle in self.retiring.drain(..) {
            let finished = handle.join.is_finished();
            let hung = handle.status.is_busy() && handle.status.silent_for(now) > timeout;
            if !finished && !hung {
                still_retiring.push(handle);
                continue;
            }
            if hung {
                handle.join.abort();
            }
            if let Some(record) = handle.status.take_current() {
                lost.push(LostTask {
                    worker_id: handle.id,
                    record,
                    reason: format!("retired worker {} ended mid-task", handle.id),
                });
            }
        }
        self.retiring = still_retiring;

        lost
    }

    /// Stops every worker
    ///
    /// Sends one sentinel per worker plus spares, cancels the pool, then
    /// waits up to `timeout` in total before aborting whatever is left.
    pub async fn shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        let handles: Vec<WorkerHandle> = self
            .workers
            .drain(..)
            .chain(self.retiring.drain(..))
            .collect();

        for _ in 0..handles.len() + SPARE_SENTINELS {
            self.sentinels.send(Task::Shutdown);
        }
        self.root.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = ShutdownReport::default();

        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut handle.join).await {
                Ok(_) => report.stopped += 1,
                Err(_) => {
                    tracing::warn!("Worker {} did not stop in time, aborting", handle.id);
                    handle.join.abort();
                    report.aborted += 1;
                }
            }
        }

        tracing::info!(
            "Worker pool stopped ({} clean, {} aborted)",
            report.stopped,
            report.aborted
        );
        report
    }
}

fn check_worker(handle: &WorkerHandle, now: Instant, timeout: Duration) -> Option<String> {
    if handle.join.is_finished() {
        return Some("worker task exited".to_string());
    }
    if handle.status.is_busy() {
        let silent = handle.status.silent_for(now);
        if silent > timeout {
            return Some(format!("no heartbeat for {:.0}s", silent.as_secs_f64()));
        }
    }
    None
}

/// Periodic health check and rescale
///
/// Runs every `reconcile_interval`, or early when `wake` is notified, until
/// `cancel` fires. Lost tasks are sent to the orchestrator as `WorkerLost`
/// results so the retry scheduler handles them like any other failure.
pub async fn monitor(
    supervisor: Arc<Mutex<Supervisor>>,
    results: TrackedSender<TaskResult>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) {
    let (interval, rate) = {
        let guard = supervisor.lock().await;
        (guard.ctx.config.reconcile_interval(), Arc::clone(&guard.ctx.rate))
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
        }

        let mut guard = supervisor.lock().await;
        for lost in guard.health_check(Instant::now()) {
            results.send(lost.into_result());
        }
        guard.reconcile(rate.target_workers());
    }

    tracing::debug!("Supervisor monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::crawler::channel::{tracked_channel, Recv, TrackedReceiver};
    use crate::crawler::worker::tests::{zero_delay_rate, ScriptedFactory};
    use crate::crawler::worker::WorkerState;

    struct Pool {
        supervisor: Supervisor,
        tasks: TrackedSender<Task>,
        results: TrackedReceiver<TaskResult>,
    }

    fn create_test_pool() -> Pool {
        let (task_tx, task_rx) = tracked_channel();
        let (result_tx, result_rx) = tracked_channel();
        let ctx = WorkerContext {
            tasks: Arc::new(Mutex::new(task_rx)),
            results: result_tx,
            factory: Arc::new(ScriptedFactory::new()),
            rate: zero_delay_rate(),
            config: WorkerConfig {
                idle_poll: 0.02,
                heartbeat_timeout: 60.0,
                ..WorkerConfig::default()
            },
        };
        Pool {
            supervisor: Supervisor::new(ctx, task_tx.clone()),
            tasks: task_tx,
            results: result_rx,
        }
    }

    #[tokio::test]
    async fn test_start_and_reconcile() {
        let mut pool = create_test_pool();
        pool.supervisor.start(3);
        assert_eq!(pool.supervisor.alive_count(), 3);

        let report = pool.supervisor.reconcile(5);
        assert_eq!(report, ReconcileReport { spawned: 2, retired: 0 });
        assert_eq!(pool.supervisor.alive_count(), 5);

        let report = pool.supervisor.reconcile(2);
        assert_eq!(report.retired, 3);
        assert_eq!(pool.supervisor.alive_count(), 2);

        assert_eq!(pool.supervisor.reconcile(2), ReconcileReport::default());

        let report = pool.supervisor.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.aborted, 0);
        assert_eq!(pool.supervisor.alive_count(), 0);
    }

    #[tokio::test]
    async fn test_workers_share_task_channel() {
        let mut pool = create_test_pool();
        pool.supervisor.start(2);

        for i in 0..6 {
            pool.tasks.send(Task::Fetch(UrlRecord::new(format!("https://example.com/{}", i), 1)));
        }

        let mut urls = Vec::new();
        while urls.len() < 6 {
            match pool.results.recv_timeout(Duration::from_secs(5)).await {
                Recv::Message(result) => urls.push(result.url),
                other => panic!("missing results: {:?}", other),
            }
        }
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), 6);

        pool.supervisor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_hung_worker_is_replaced_and_task_returned() {
        let mut pool = create_test_pool();
        pool.supervisor.start(1);

        // Simulate a worker stuck mid-task
        let record = UrlRecord::new("https://example.com/slow", 2);
        let status = Arc::clone(&pool.supervisor.workers[0].status);
        status.begin(&record);

        let later = Instant::now() + Duration::from_secs(120);
        let lost = pool.supervisor.health_check(later);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].record, record);
        assert_eq!(status.state(), WorkerState::Crashed);
        assert_eq!(pool.supervisor.alive_count(), 0);

        let result = lost[0].clone().into_result();
        assert!(matches!(
            result.outcome,
            TaskOutcome::Error {
                kind: ErrorKind::WorkerLost,
                ..
            }
        ));
        assert_eq!(result.depth, 2);

        pool.supervisor.reconcile(1);
        assert_eq!(pool.supervisor.alive_count(), 1);
        pool.supervisor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_exited_worker_is_detected() {
        let mut pool = create_test_pool();
        pool.supervisor.start(2);

        pool.supervisor.workers[0].join.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let lost = pool.supervisor.health_check(Instant::now());
        assert!(lost.is_empty());
        assert_eq!(pool.supervisor.alive_count(), 1);

        pool.supervisor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_monitor_restores_target() {
        let mut pool = create_test_pool();
        pool.supervisor.ctx.config.reconcile_interval = 0.02;
        let rate = Arc::clone(&pool.supervisor.ctx.rate);
        let (result_tx, _result_rx) = tracked_channel();
        let supervisor = Arc::new(Mutex::new(pool.supervisor));

        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let handle = tokio::spawn(monitor(
            Arc::clone(&supervisor),
            result_tx,
            Arc::clone(&wake),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(supervisor.lock().await.alive_count(), rate.target_workers());

        cancel.cancel();
        handle.await.unwrap();
        supervisor.lock().await.shutdown(Duration::from_secs(5)).await;
    }
}
