//! Stop signalling and shutdown phases

use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Why a crawl stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `StopHandle::request_stop`, e.g. Ctrl-C
    Requested,
    /// `max-pages` reached
    MaxPages,
    /// Nothing left to crawl
    Completed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "stop requested"),
            StopReason::MaxPages => write!(f, "page limit reached"),
            StopReason::Completed => write!(f, "crawl complete"),
        }
    }
}

/// Cloneable handle that ends a running crawl
///
/// The first reason recorded wins; later calls only re-cancel.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reason` and signals every waiter
    ///
    /// Returns true if this call set the reason.
    pub fn stop(&self, reason: StopReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn request_stop(&self) {
        self.stop(StopReason::Requested);
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    /// Completes once the crawl has been told to stop
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Orchestrator shutdown state machine
///
/// `Running -> Draining -> Stopped`, passing through `Forced` when a task
/// misses the shutdown deadline and has to be aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Forced,
    Stopped,
}

impl ShutdownPhase {
    /// Moves to `next` if it is a later phase
    pub fn advance(&mut self, next: ShutdownPhase) {
        if next.rank() > self.rank() {
            tracing::debug!("Shutdown phase {:?} -> {:?}", self, next);
            *self = next;
        }
    }

    fn rank(self) -> u8 {
        match self {
            ShutdownPhase::Running => 0,
            ShutdownPhase::Draining => 1,
            ShutdownPhase::Forced => 2,
            ShutdownPhase::Stopped => 3,
        }
    }
}
