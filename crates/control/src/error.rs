use thiserror::Error;
use turbo_core::{ClusterId, ConfigError, DeviceError};

use crate::controller::Phase;
use crate::tracker::Channel;

/// Inconsistent cluster state found while loading the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("priority table {table} returned no rows")]
    Empty { table: String },

    #[error("priority table {table} lists cluster {id} more than once")]
    DuplicateId { table: String, id: ClusterId },

    #[error("priority table {table} row {row} has no {what}")]
    MalformedRow {
        table: String,
        row: usize,
        what: &'static str,
    },

    #[error("priorities {found:?} are not a permutation of 0..{expected}")]
    InconsistentPriorities { expected: usize, found: Vec<u32> },

    #[error("device has {found} clusters but {expected} are configured")]
    CardinalityMismatch { expected: usize, found: usize },
}

/// Top-level error of the control loop.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("counter anomaly on {channel} channel: cumulative bytes fell from {previous} to {current}")]
    CounterAnomaly {
        channel: Channel,
        previous: u64,
        current: u64,
    },

    #[error("clock anomaly: device timestamp {current} is earlier than baseline {baseline}")]
    ClockAnomaly { baseline: u64, current: u64 },

    #[error("{channel} channel delta of {delta_bytes} bytes overflows when converted to bits")]
    BitsOverflow { channel: Channel, delta_bytes: u64 },

    #[error("throughput sink {path}: {source}")]
    Sink {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot {operation} while the controller is {phase}")]
    Lifecycle {
        phase: Phase,
        operation: &'static str,
    },
}

impl ControlError {
    /// Anomalies are surfaced but do not stop the control loop.
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            ControlError::CounterAnomaly { .. }
                | ControlError::ClockAnomaly { .. }
                | ControlError::BitsOverflow { .. }
        )
    }
}
