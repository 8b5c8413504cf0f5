use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler operational metrics, logged on shutdown.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Total successful executions by task name.
    pub tasks_executed: HashMap<String, u64>,
    /// Fatal failures by task name.
    pub tasks_failed: HashMap<String, u64>,
    /// Counter/clock anomalies by task name.
    pub anomalies: HashMap<String, u64>,
    /// Average task duration by task name.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Last successful execution time by task name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Number of scheduling passes.
    pub ticks: u64,
}

impl SchedulerMetrics {
    /// Record a task execution.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration) {
        *self.tasks_executed.entry(task_name.to_string()).or_default() += 1;
        self.last_run.insert(task_name.to_string(), Utc::now());

        let count = self.tasks_executed[task_name];
        let prev_avg = self
            .avg_task_duration
            .get(task_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(task_name.to_string(), new_avg);
    }

    pub fn record_failure(&mut self, task_name: &str) {
        *self.tasks_failed.entry(task_name.to_string()).or_default() += 1;
    }

    pub fn record_anomaly(&mut self, task_name: &str) {
        *self.anomalies.entry(task_name.to_string()).or_default() += 1;
    }

    pub fn executions(&self, task_name: &str) -> u64 {
        self.tasks_executed.get(task_name).copied().unwrap_or(0)
    }
}
