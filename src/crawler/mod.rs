//! Crawl engine
//!
//! This module contains the core crawling logic, including:
//! - The URL frontier and dedup cache
//! - Centralized retry scheduling with exponential backoff
//! - The supervised worker pool and its task/result channels
//! - Overall crawl coordination, checkpointing and shutdown

mod channel;
mod coordinator;
mod frontier;
mod retry;
mod stop;
pub mod supervisor;
mod worker;

pub use channel::{tracked_channel, ChannelDepth, Recv, TrackedReceiver, TrackedSender};
pub use coordinator::{run_crawl, Coordinator};
pub use frontier::{Completion, DiscoveryReport, Frontier, FrontierSnapshot, UrlRecord};
pub use retry::{RetryAction, RetryDecision, RetryEntry, RetryScheduler, ScheduledRetry};
pub use stop::{ShutdownPhase, StopHandle, StopReason};
pub use supervisor::{LostTask, ReconcileReport, ShutdownReport, Supervisor};
pub use worker::{Task, TaskResult, WorkerContext, WorkerState, WorkerStatus};
