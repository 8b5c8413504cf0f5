use std::time::{Duration, Instant};

use super::Scheduler;

impl Scheduler {
    /// Indices of the tasks due at `now`, in registration order.
    pub(crate) fn due_tasks(&self, now: Instant) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.next_due.is_some_and(|due| due <= now))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// How long the loop may sleep after `now`: until the earliest due task,
    /// but never longer than one tick so the shutdown flag stays responsive.
    pub fn next_wakeup(&self, now: Instant) -> Duration {
        self.tasks
            .iter()
            .filter_map(|t| t.next_due)
            .min()
            .map(|due| due.saturating_duration_since(now))
            .map_or(self.config.tick, |wait| wait.min(self.config.tick))
    }
}
