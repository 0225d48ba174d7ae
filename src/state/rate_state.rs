use crate::config::RateConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Number of outcomes (capped by the window size) needed before a periodic
/// evaluation is considered.
const MIN_EVALUATION_SAMPLES: usize = 5;

/// Lower bound on the shortened evaluation interval used during recovery.
const MIN_RECOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// Cumulative server errors tolerated before entering light recovery.
const SERVER_ERROR_TOLERANCE: u64 = 5;

/// Share of 5xx responses in the window above which an evaluation throttles.
const SERVER_ERROR_SHARE: f64 = 0.2;

/// Moderate and severe recovery only ease parameters after this much time in
/// recovery, this many consecutive successes and this window success rate.
const CAREFUL_RECOVERY_TIME: Duration = Duration::from_secs(120);
const CAREFUL_RECOVERY_SUCCESSES: u32 = 30;
const CAREFUL_RECOVERY_RATE: f64 = 0.98;

/// Throttling severity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryLevel {
    #[default]
    None,
    Light,
    Moderate,
    Severe,
}

impl RecoveryLevel {
    fn rank(self) -> u32 {
        match self {
            RecoveryLevel::None => 0,
            RecoveryLevel::Light => 1,
            RecoveryLevel::Moderate => 2,
            RecoveryLevel::Severe => 3,
        }
    }

    /// Next tier up, saturating at `Severe`. A first rate limit skips
    /// straight to `Moderate`.
    pub fn escalate(self) -> Self {
        match self {
            RecoveryLevel::None => RecoveryLevel::Moderate,
            RecoveryLevel::Light => RecoveryLevel::Moderate,
            RecoveryLevel::Moderate | RecoveryLevel::Severe => RecoveryLevel::Severe,
        }
    }

    /// Next tier down, one step at a time.
    pub fn relax(self) -> Self {
        match self {
            RecoveryLevel::None | RecoveryLevel::Light => RecoveryLevel::None,
            RecoveryLevel::Moderate => RecoveryLevel::Light,
            RecoveryLevel::Severe => RecoveryLevel::Moderate,
        }
    }
}

impl fmt::Display for RecoveryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryLevel::None => "normal",
            RecoveryLevel::Light => "light",
            RecoveryLevel::Moderate => "moderate",
            RecoveryLevel::Severe => "severe",
        };
        write!(f, "{}", s)
    }
}

/// What the rate controller needs to know about one completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub success: bool,
    pub rate_limited: bool,
    pub http_status: Option<u16>,
}

impl OutcomeSummary {
    pub fn success(http_status: Option<u16>) -> Self {
        Self {
            success: true,
            rate_limited: false,
            http_status,
        }
    }

    pub fn failure(http_status: Option<u16>, rate_limited: bool) -> Self {
        Self {
            success: false,
            rate_limited,
            http_status,
        }
    }
}

/// Cumulative request counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub rate_limited_requests: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub adjustments_made: u64,
    pub last_adjustment_reason: String,
}

impl RateStats {
    pub fn success_rate(&self) -> f64 {
        ratio(self.successful_requests, self.total_requests)
    }

    pub fn rate_limited_rate(&self) -> f64 {
        ratio(self.rate_limited_requests, self.total_requests)
    }

    pub fn error_rate(&self) -> f64 {
        ratio(
            self.total_requests.saturating_sub(self.successful_requests),
            self.total_requests,
        )
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// A change to the worker target or request delay
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub target_workers: usize,
    pub delay: Duration,
    pub reason: String,
    /// True when triggered immediately by a rate-limit signal
    pub forced: bool,
}

/// Point-in-time copy of the tunables workers and the supervisor read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSettings {
    pub target_workers: usize,
    pub delay: Duration,
    pub recovery_level: RecoveryLevel,
    pub recovery_mode: bool,
}

/// Serializable form stored in checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateControllerState {
    pub target_workers: usize,
    /// Seconds
    pub current_delay: f64,
    pub recovery_level: RecoveryLevel,
    pub recovery_mode: bool,
    #[serde(default)]
    pub window: Vec<OutcomeSummary>,
    #[serde(default)]
    pub stats: RateStats,
}

/// Adaptive rate state
///
/// All methods take `now` so the control law can be driven deterministically.
/// Callers are expected to serialize access (see `RateController`).
#[derive(Debug, Clone)]
pub struct RateState {
    config: RateConfig,
    target_workers: usize,
    current_delay: f64,
    level: RecoveryLevel,
    window: VecDeque<OutcomeSummary>,
    stats: RateStats,
    consecutive_successes: u32,
    consecutive_failures: u32,
    /// Successes since the last level change or failure
    level_successes: u32,
    last_evaluation: Option<Instant>,
    last_forced: Option<Instant>,
    level_since: Instant,
    recovery_since: Option<Instant>,
}

impl RateState {
    /// Creates state at the configured initial values
    pub fn new(config: RateConfig, now: Instant) -> Self {
        let mut state = Self {
            target_workers: config.initial_workers,
            current_delay: config.initial_delay,
            window: VecDeque::with_capacity(config.window_size),
            config,
            level: RecoveryLevel::None,
            stats: RateStats {
                last_adjustment_reason: "Initial settings".to_string(),
                ..RateStats::default()
            },
            consecutive_successes: 0,
            consecutive_failures: 0,
            level_successes: 0,
            last_evaluation: None,
            last_forced: None,
            level_since: now,
            recovery_since: None,
        };
        state.clamp();
        state
    }

    pub fn target_workers(&self) -> usize {
        self.target_workers
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.current_delay)
    }

    pub fn recovery_level(&self) -> RecoveryLevel {
        self.level
    }

    pub fn in_recovery(&self) -> bool {
        self.level != RecoveryLevel::None
    }

    pub fn stats(&self) -> &RateStats {
        &self.stats
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn settings(&self) -> RateSettings {
        RateSettings {
            target_workers: self.target_workers,
            delay: self.delay(),
            recovery_level: self.level,
            recovery_mode: self.in_recovery(),
        }
    }

    /// Whether a forced reduction happened less than `cooldown` ago
    pub fn in_cooldown(&self, now: Instant) -> bool {
        match self.last_forced {
            Some(at) => now.saturating_duration_since(at) < self.cooldown(),
            None => false,
        }
    }

    /// Registers one completed request
    ///
    /// A rate-limited outcome escalates severity and, outside the cooldown,
    /// reduces throughput before returning. Any other outcome may trigger a
    /// periodic evaluation if one is due.
    ///
    /// # Returns
    ///
    /// * `Some(Adjustment)` - The worker target or delay changed
    /// * `None` - Nothing changed
    pub fn register(&mut self, outcome: OutcomeSummary, now: Instant) -> Option<Adjustment> {
        self.stats.total_requests += 1;

        if outcome.success {
            self.stats.successful_requests += 1;
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            self.level_successes += 1;
            self.maybe_relax(now);
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            self.level_successes = 0;

            if outcome.rate_limited {
                self.stats.rate_limited_requests += 1;
                self.set_level(self.level.escalate(), now);
            } else {
                match outcome.http_status {
                    Some(400..=499) => self.stats.client_errors += 1,
                    Some(500..=599) => {
                        self.stats.server_errors += 1;
                        if self.stats.server_errors > SERVER_ERROR_TOLERANCE && !self.in_recovery()
                        {
                            tracing::warn!(
                                "{} server errors so far, entering light recovery",
                                self.stats.server_errors
                            );
                            self.set_level(RecoveryLevel::Light, now);
                        }
                    }
                    _ => {}
                }
            }
        }

        self.window.push_back(outcome);
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }

        if outcome.rate_limited {
            if self.in_cooldown(now) {
                tracing::debug!(
                    "Rate limit signal during cooldown, severity now {}",
                    self.level
                );
                return None;
            }
            let reason = format!(
                "Rate limiting detected (HTTP {})",
                outcome
                    .http_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "n/a".to_string())
            );
            return Some(self.force_reduction(reason, now));
        }

        if self.evaluation_due(now) {
            return self.evaluate(now);
        }

        None
    }

    /// Applies the reduction for the current severity and starts the cooldown
    pub fn force_reduction(&mut self, reason: String, now: Instant) -> Adjustment {
        let before = (self.target_workers, self.current_delay);
        let min = self.config.min_workers;

        match self.level {
            RecoveryLevel::Severe => {
                self.target_workers = min;
                self.current_delay *= 3.0;
            }
            RecoveryLevel::Moderate => {
                self.target_workers = (self.target_workers / 2).max(min);
                self.current_delay *= 2.0;
            }
            RecoveryLevel::Light | RecoveryLevel::None => {
                if self.level == RecoveryLevel::None {
                    self.set_level(RecoveryLevel::Light, now);
                }
                self.target_workers = self.target_workers.saturating_sub(1).max(min);
                self.current_delay *= 1.5;
            }
        }
        self.clamp();

        self.last_forced = Some(now);
        self.last_evaluation = Some(now);
        self.window.retain(|o| !o.rate_limited);

        tracing::warn!(
            "Forced {} reduction: workers {} -> {}, delay {:.2}s -> {:.2}s ({})",
            self.level,
            before.0,
            self.target_workers,
            before.1,
            self.current_delay,
            reason
        );

        self.record_adjustment(reason, true)
    }

    /// Whether a periodic evaluation should run now
    pub fn evaluation_due(&self, now: Instant) -> bool {
        if self.in_cooldown(now) {
            return false;
        }

        let needed = MIN_EVALUATION_SAMPLES.min(self.config.window_size);
        if self.window.len() < needed {
            return false;
        }

        match self.last_evaluation {
            Some(at) => now.saturating_duration_since(at) >= self.evaluation_interval(),
            None => true,
        }
    }

    /// Interval between periodic evaluations, shortened while recovering
    pub fn evaluation_interval(&self) -> Duration {
        let base = Duration::from_secs_f64(self.config.adjustment_interval);
        if !self.in_recovery() {
            return base;
        }
        let shortened = base / (self.level.rank() + 1);
        shortened.max(MIN_RECOVERY_INTERVAL.min(base))
    }

    /// Evaluates the window success rate and adjusts if warranted
    pub fn evaluate(&mut self, now: Instant) -> Option<Adjustment> {
        self.last_evaluation = Some(now);

        if self.window.is_empty() {
            return None;
        }

        let total = self.window.len();
        let successes = self.window.iter().filter(|o| o.success).count();
        let server_errors = self
            .window
            .iter()
            .filter(|o| {
                !o.success && !o.rate_limited && matches!(o.http_status, Some(500..=599))
            })
            .count();
        let success_rate = successes as f64 / total as f64;
        let before = (self.target_workers, self.current_delay);

        let reason = if server_errors as f64 / total as f64 > SERVER_ERROR_SHARE {
            self.target_workers = self.target_workers.saturating_sub(1);
            self.current_delay *= 1.3;
            if !self.in_recovery() {
                self.set_level(RecoveryLevel::Light, now);
            }
            format!("High server error rate ({}/{})", server_errors, total)
        } else {
            match self.level {
                RecoveryLevel::None => self.evaluate_normal(success_rate, now)?,
                RecoveryLevel::Light => {
                    if success_rate < 0.95 {
                        tracing::debug!(
                            "Holding during light recovery (success rate {:.1}%)",
                            success_rate * 100.0
                        );
                        return None;
                    }
                    self.ease(format!(
                        "Light recovery, success rate {:.1}%",
                        success_rate * 100.0
                    ))?
                }
                RecoveryLevel::Moderate | RecoveryLevel::Severe => {
                    self.ease_carefully(success_rate, now)?
                }
            }
        };

        self.clamp();
        if before == (self.target_workers, self.current_delay) {
            return None;
        }

        tracing::info!(
            "Rate adjustment: workers {} -> {}, delay {:.2}s -> {:.2}s ({})",
            before.0,
            self.target_workers,
            before.1,
            self.current_delay,
            reason
        );
        Some(self.record_adjustment(reason, false))
    }

    fn evaluate_normal(&mut self, success_rate: f64, now: Instant) -> Option<String> {
        let pct = success_rate * 100.0;

        if success_rate >= 0.95 {
            self.ease(format!("High success rate ({:.1}%)", pct))
        } else if success_rate >= 0.8 {
            None
        } else if success_rate >= 0.5 {
            if self.target_workers > self.config.min_workers + 1 {
                self.target_workers -= 1;
            } else {
                self.current_delay *= 1.2;
            }
            Some(format!("Moderate success rate ({:.1}%)", pct))
        } else {
            let cut = (self.target_workers + 2) / 3;
            self.target_workers = self.target_workers.saturating_sub(cut.max(1));
            self.current_delay *= 1.5;
            self.set_level(RecoveryLevel::Light, now);
            Some(format!("Low success rate ({:.1}%)", pct))
        }
    }

    /// Moderate/severe easing: one worker, else a 10% shorter delay, else
    /// a step down to light recovery
    fn ease_carefully(&mut self, success_rate: f64, now: Instant) -> Option<String> {
        let in_recovery = self
            .recovery_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        if success_rate < CAREFUL_RECOVERY_RATE
            || self.consecutive_successes < CAREFUL_RECOVERY_SUCCESSES
            || in_recovery <= CAREFUL_RECOVERY_TIME
        {
            tracing::debug!(
                "Holding restrictive parameters during {} recovery ({:.0}s)",
                self.level,
                in_recovery.as_secs_f64()
            );
            return None;
        }

        let secs = in_recovery.as_secs_f64();
        if self.target_workers < self.config.max_workers {
            self.target_workers += 1;
            Some(format!("Careful recovery after {:.0}s, one more worker", secs))
        } else if self.current_delay > self.config.min_delay * 2.0 {
            self.current_delay = (self.current_delay / 1.1).max(self.config.min_delay);
            Some(format!("Careful recovery after {:.0}s, shorter delay", secs))
        } else {
            let from = self.level;
            self.set_level(RecoveryLevel::Light, now);
            tracing::info!(
                "Stepping down from {} to light recovery after {:.0}s",
                from,
                secs
            );
            None
        }
    }

    /// One notch up: a worker if below the cap, otherwise a shorter delay
    fn ease(&mut self, reason: String) -> Option<String> {
        if self.target_workers < self.config.max_workers {
            self.target_workers += 1;
            Some(reason)
        } else if self.current_delay > self.config.min_delay {
            self.current_delay /= 1.2;
            Some(reason)
        } else {
            None
        }
    }

    fn maybe_relax(&mut self, now: Instant) {
        if !self.in_recovery() {
            return;
        }
        if self.level_successes < self.config.recovery_successes {
            return;
        }
        let dwell = Duration::from_secs_f64(self.config.recovery_dwell);
        if now.saturating_duration_since(self.level_since) < dwell {
            return;
        }

        let from = self.level;
        self.set_level(from.relax(), now);
        tracing::info!(
            "Recovery relaxed from {} to {} after sustained success",
            from,
            self.level
        );
    }

    fn set_level(&mut self, level: RecoveryLevel, now: Instant) {
        if level == self.level {
            return;
        }
        if level == RecoveryLevel::None {
            self.recovery_since = None;
        } else if self.level == RecoveryLevel::None {
            self.recovery_since = Some(now);
        }
        self.level = level;
        self.level_since = now;
        self.level_successes = 0;
    }

    fn record_adjustment(&mut self, reason: String, forced: bool) -> Adjustment {
        self.stats.adjustments_made += 1;
        self.stats.last_adjustment_reason = reason.clone();
        Adjustment {
            target_workers: self.target_workers,
            delay: self.delay(),
            reason,
            forced,
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.config.cooldown)
    }

    fn clamp(&mut self) {
        self.target_workers = self
            .target_workers
            .clamp(self.config.min_workers, self.config.max_workers);
        self.current_delay = self
            .current_delay
            .clamp(self.config.min_delay, self.config.max_delay);
    }

    /// Serializable snapshot for checkpoints
    pub fn to_checkpoint(&self) -> RateControllerState {
        RateControllerState {
            target_workers: self.target_workers,
            current_delay: self.current_delay,
            recovery_level: self.level,
            recovery_mode: self.in_recovery(),
            window: self.window.iter().copied().collect(),
            stats: self.stats.clone(),
        }
    }

    /// Restores from a checkpoint, biased toward caution
    ///
    /// The delay is raised by 20% and one worker is removed, then both are
    /// clamped to the configured bounds. Cooldown and streak counters start
    /// fresh.
    pub fn restore(&mut self, saved: &RateControllerState, now: Instant) {
        self.target_workers = saved.target_workers.saturating_sub(1);
        self.current_delay = if saved.current_delay.is_finite() {
            saved.current_delay * 1.2
        } else {
            self.config.initial_delay
        };
        self.level = saved.recovery_level;
        self.level_since = now;
        self.recovery_since = (self.level != RecoveryLevel::None).then_some(now);
        self.stats = saved.stats.clone();

        self.window.clear();
        let skip = saved.window.len().saturating_sub(self.config.window_size);
        self.window.extend(saved.window.iter().skip(skip).copied());

        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
        self.level_successes = 0;
        self.last_forced = None;
        self.last_evaluation = Some(now);
        self.clamp();

        tracing::info!(
            "Restored rate state: {} workers, {:.2}s delay, {} recovery",
            self.target_workers,
            self.current_delay,
            self.level
        );
    }
}
