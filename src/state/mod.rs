//! State module for adaptive crawl pacing
//!
//! # Components
//!
//! - `RateState`: worker target, request delay and recovery tier, driven by outcomes
//! - `RecoveryLevel`: throttling severity (`None`, `Light`, `Moderate`, `Severe`)
//! - `OutcomeSummary`: the per-request signal the control law consumes
//! - `RateControllerState`: serializable form stored in checkpoints

mod rate_state;

pub use rate_state::{
    Adjustment, OutcomeSummary, RateControllerState, RateSettings, RateState, RateStats,
    RecoveryLevel,
};
