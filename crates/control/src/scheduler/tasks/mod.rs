//! Concrete control task implementations.

mod rank_task;
mod throughput_task;

pub use rank_task::RankTask;
pub use throughput_task::ThroughputTask;
