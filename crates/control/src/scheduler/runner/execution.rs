use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, warn};
use turbo_core::SwitchControl;

use crate::error::ControlError;

use super::Scheduler;

impl Scheduler {
    /// Run every task due at `now`, one after another. Returns how many ran.
    ///
    /// Anomalies are logged and counted; any other error stops the pass and
    /// is returned. The failing task is re-armed like any other, but callers
    /// are expected to end the loop.
    pub fn run_pending(
        &mut self,
        now: Instant,
        device: &mut dyn SwitchControl,
    ) -> Result<usize, ControlError> {
        self.start(now);
        self.metrics.ticks += 1;

        let due = self.due_tasks(now);
        for &idx in &due {
            let scheduled = &mut self.tasks[idx];
            scheduled.next_due = Some(now + scheduled.task.interval());

            let name = scheduled.task.name().to_string();
            let started = Instant::now();
            match scheduled.task.execute(device) {
                Ok(report) => {
                    debug!(
                        task = %name,
                        duration = ?report.duration,
                        items = report.items_processed,
                        summary = report.summary.as_deref().unwrap_or(""),
                        "task completed"
                    );
                    self.metrics.record_execution(&name, report.duration);
                }
                Err(e) if e.is_anomaly() => {
                    error!(task = %name, error = %e, "anomaly detected");
                    self.metrics.record_anomaly(&name);
                    self.metrics.record_execution(&name, started.elapsed());
                }
                Err(e) => {
                    error!(task = %name, error = %e, "task failed");
                    self.metrics.record_failure(&name);
                    return Err(e);
                }
            }
        }
        Ok(due.len())
    }

    /// Run the loop until `shutdown` is set or a task fails.
    ///
    /// Blocks the calling thread; sleeps between passes for at most one tick.
    pub fn run(
        &mut self,
        device: &mut dyn SwitchControl,
        shutdown: &AtomicBool,
    ) -> Result<(), ControlError> {
        info!(
            tasks = self.tasks.len(),
            tick = ?self.config.tick,
            "scheduler starting"
        );
        self.start(Instant::now());

        while !shutdown.load(Ordering::Relaxed) {
            self.run_pending(Instant::now(), device)?;
            std::thread::sleep(self.next_wakeup(Instant::now()));
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// Drain every task, even if an earlier one fails. Returns the first error.
    pub fn drain(&mut self) -> Result<(), ControlError> {
        let mut first_err = None;
        for scheduled in &mut self.tasks {
            if let Err(e) = scheduled.task.drain() {
                warn!(task = scheduled.task.name(), error = %e, "drain failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
