use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use turbo_core::{LayoutNames, SwitchControl};

use crate::error::ControlError;
use crate::scheduler::task::ControlTask;
use crate::scheduler::types::TaskReport;
use crate::sink::ThroughputSinks;
use crate::tracker::{reconstruct_timestamp, ChannelTotals, ThroughputTracker};

/// Samples the device clock and egress counters and appends throughput
/// deltas to the two channel streams.
///
/// Owns the tracker and both sinks. `drain` flushes the sinks and closes
/// them; the task cannot run afterwards.
pub struct ThroughputTask<W: Write = BufWriter<File>> {
    tracker: ThroughputTracker,
    sinks: Option<ThroughputSinks<W>>,
    names: LayoutNames,
    timestamp_shift: u32,
    interval: Duration,
}

impl<W: Write> ThroughputTask<W> {
    pub fn new(sinks: ThroughputSinks<W>, names: LayoutNames, timestamp_shift: u32, interval: Duration) -> Self {
        Self {
            tracker: ThroughputTracker::new(),
            sinks: Some(sinks),
            names,
            timestamp_shift,
            interval,
        }
    }

    pub fn tracker(&self) -> &ThroughputTracker {
        &self.tracker
    }

    /// The open sinks, or `None` once drained.
    pub fn sinks(&self) -> Option<&ThroughputSinks<W>> {
        self.sinks.as_ref()
    }

    /// Sum of byte counts over every entry of `table`.
    fn table_bytes(device: &mut dyn SwitchControl, table: &str) -> Result<u64, ControlError> {
        Ok(device
            .read_table_entries(table)?
            .iter()
            .map(|e| e.counter.byte_count)
            .sum())
    }
}

impl<W: Write> ControlTask for ThroughputTask<W> {
    fn name(&self) -> &str {
        "throughput"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn execute(&mut self, device: &mut dyn SwitchControl) -> Result<TaskReport, ControlError> {
        let start = Instant::now();
        let Some(sinks) = self.sinks.as_mut() else {
            return Err(ControlError::Sink {
                path: "throughput sinks".to_string(),
                source: io::Error::other("already closed"),
            });
        };

        let raw = device.read_register(&self.names.timestamp_register)?;
        let timestamp = reconstruct_timestamp(raw, self.timestamp_shift);
        let malicious = Self::table_bytes(device, &self.names.malicious_counter_table)?;
        let benign = Self::table_bytes(device, &self.names.benign_counter_table)?;
        debug!(timestamp, benign, malicious, "throughput sample");

        let observation = self.tracker.observe(timestamp, ChannelTotals::new(benign, malicious))?;
        let records = observation.records;
        if !records.is_empty() {
            sinks.write(&records)?;
            sinks.flush()?;
            info!(
                relative_timestamp = records[0].relative_timestamp,
                rows = records.len(),
                "throughput recorded"
            );
        }

        // Rows of healthy channels are already written; the first anomaly
        // goes to the scheduler, the rest are only logged.
        let mut anomalies = observation.anomalies.into_iter();
        if let Some(first) = anomalies.next() {
            for extra in anomalies {
                error!(task = "throughput", error = %extra, "anomaly detected");
            }
            return Err(first);
        }

        Ok(TaskReport {
            task_name: self.name().to_string(),
            duration: start.elapsed(),
            items_processed: records.len(),
            summary: None,
        })
    }

    fn drain(&mut self) -> Result<(), ControlError> {
        let Some(mut sinks) = self.sinks.take() else {
            return Ok(());
        };
        let flushed = sinks.flush();
        info!(
            benign_rows = sinks.benign.rows(),
            malicious_rows = sinks.malicious.rows(),
            "throughput sinks closed"
        );
        flushed
    }
}
