//! Cooperative periodic scheduler for the control loop.
//!
//! Runs [`ControlTask`] implementations on one thread, each on its own
//! interval. A task becomes due once its interval has elapsed; due tasks run
//! in registration order and never overlap, so a slow device call delays
//! whatever is due next.

pub mod metrics;
pub mod runner;
pub mod task;
pub mod tasks;
pub mod types;

pub use metrics::SchedulerMetrics;
pub use runner::Scheduler;
pub use task::ControlTask;
pub use tasks::{RankTask, ThroughputTask};
pub use types::{SchedulerConfig, TaskReport};
