use std::time::Instant;

use tracing::info;

use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::task::ControlTask;
use crate::scheduler::types::SchedulerConfig;

/// A registered task and the instant it next becomes due.
pub(super) struct ScheduledTask {
    pub(super) task: Box<dyn ControlTask>,
    /// `None` until the scheduler is started.
    pub(super) next_due: Option<Instant>,
}

/// The control scheduler. Owns its tasks and runs them one at a time on the
/// calling thread.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    /// Registered tasks, in check order.
    pub(super) tasks: Vec<ScheduledTask>,
    pub(super) metrics: SchedulerMetrics,
    pub(super) started: bool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
            metrics: SchedulerMetrics::default(),
            started: false,
        }
    }

    /// Register a periodic task. Tasks are checked in registration order.
    pub fn register_task(&mut self, task: Box<dyn ControlTask>) {
        info!(task = task.name(), interval = ?task.interval(), "registered task");
        self.tasks.push(ScheduledTask {
            task,
            next_due: None,
        });
    }

    /// Arm every task: each first becomes due one interval after `now`.
    /// Calling it again has no effect.
    pub fn start(&mut self, now: Instant) {
        if self.started {
            return;
        }
        for scheduled in &mut self.tasks {
            scheduled.next_due = Some(now + scheduled.task.interval());
        }
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// Names of the registered tasks, in check order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.task.name()).collect()
    }

    /// When `name` next becomes due, if it is registered and armed.
    pub fn next_due(&self, name: &str) -> Option<Instant> {
        self.tasks
            .iter()
            .find(|t| t.task.name() == name)
            .and_then(|t| t.next_due)
    }
}
