use std::time::Duration;

use turbo_core::SwitchControl;

use super::types::TaskReport;
use crate::error::ControlError;

/// A unit of periodic control work.
///
/// Implementations own whatever state they mutate (the rank task owns the
/// cluster registry, the throughput task owns the tracker and its sinks) and
/// reach the device only through the handle passed to [`execute`].
///
/// [`execute`]: ControlTask::execute
pub trait ControlTask {
    /// Human-readable name for logging and metrics.
    fn name(&self) -> &str;

    /// Time between two runs.
    fn interval(&self) -> Duration;

    /// Run once. Device errors are fatal to the loop; anomalies
    /// ([`ControlError::is_anomaly`]) are recorded and the loop goes on.
    fn execute(&mut self, device: &mut dyn SwitchControl) -> Result<TaskReport, ControlError>;

    /// Release buffered output. Called once when the loop stops, whatever
    /// the reason.
    fn drain(&mut self) -> Result<(), ControlError> {
        Ok(())
    }
}
