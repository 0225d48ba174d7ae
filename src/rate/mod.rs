//! Adaptive rate control
//!
//! `RateController` is the only writer of the crawl's rate state. Workers read
//! the current delay, the supervisor reads the worker target, and the
//! orchestrator feeds it one `OutcomeSummary` per completed request.

use crate::config::RateConfig;
use crate::state::{
    Adjustment, OutcomeSummary, RateControllerState, RateSettings, RateState, RateStats,
};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Thread-safe handle around `RateState`
#[derive(Debug)]
pub struct RateController {
    state: Mutex<RateState>,
}

impl RateController {
    pub fn new(config: RateConfig) -> Self {
        Self {
            state: Mutex::new(RateState::new(config, Instant::now())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a completed request and returns any resulting adjustment
    pub fn register_outcome(&self, outcome: OutcomeSummary) -> Option<Adjustment> {
        self.register_outcome_at(outcome, Instant::now())
    }

    pub fn register_outcome_at(&self, outcome: OutcomeSummary, now: Instant) -> Option<Adjustment> {
        self.lock().register(outcome, now)
    }

    /// Runs an evaluation regardless of the interval
    pub fn force_evaluation(&self) -> Option<Adjustment> {
        self.lock().evaluate(Instant::now())
    }

    pub fn target_workers(&self) -> usize {
        self.lock().target_workers()
    }

    pub fn current_delay(&self) -> Duration {
        self.lock().delay()
    }

    pub fn settings(&self) -> RateSettings {
        self.lock().settings()
    }

    pub fn stats(&self) -> RateStats {
        self.lock().stats().clone()
    }

    pub fn to_checkpoint(&self) -> RateControllerState {
        self.lock().to_checkpoint()
    }

    pub fn restore(&self, saved: &RateControllerState) {
        self.lock().restore(saved, Instant::now());
    }
}
