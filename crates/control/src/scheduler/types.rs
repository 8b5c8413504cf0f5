use std::time::Duration;

use serde::Serialize;
use turbo_core::ScheduleConfig;

/// Result of executing a control task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    /// Name of the task that produced this report.
    pub task_name: String,
    /// How long the task took, device round trips included.
    pub duration: Duration,
    /// Number of items processed (clusters ranked, records written).
    pub items_processed: usize,
    /// Optional human-readable summary.
    pub summary: Option<String>,
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Longest the loop sleeps before re-checking for due tasks and the
    /// shutdown flag.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
        }
    }
}

impl From<&ScheduleConfig> for SchedulerConfig {
    fn from(schedule: &ScheduleConfig) -> Self {
        Self {
            tick: schedule.tick(),
        }
    }
}
