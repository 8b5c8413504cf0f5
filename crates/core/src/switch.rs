//! Narrow interface between the control loop and the forwarding device.
//!
//! The session layer behind this trait (transport, arbitration, name to id
//! resolution) lives outside the control core. Every call blocks until the
//! device answers; there is no timeout or retry at this level.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DeviceError};

/// Per-entry direct counter data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterData {
    pub byte_count: u64,
    pub packet_count: u64,
}

/// A table entry as read back from the device.
///
/// Match fields and action params keep the order the device reports them in;
/// callers that only care about the first key (`cluster_id`, `queue_id`) rely
/// on that order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub match_fields: IndexMap<String, u64>,
    pub action_params: IndexMap<String, u64>,
    #[serde(default)]
    pub counter: CounterData,
}

impl TableEntry {
    /// Value of the first exact-match field.
    pub fn first_match(&self) -> Option<u64> {
        self.match_fields.values().next().copied()
    }

    /// Value of the first action parameter.
    pub fn first_param(&self) -> Option<u64> {
        self.action_params.values().next().copied()
    }
}

/// A single table-entry write (insert or modify).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableWrite {
    pub table: String,
    pub match_fields: IndexMap<String, u64>,
    pub action: String,
    pub params: IndexMap<String, u64>,
}

impl TableWrite {
    /// `table[field=value,...]`, used to identify the entry in errors and logs.
    pub fn target(&self) -> String {
        let keys: Vec<String> = self
            .match_fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}[{}]", self.table, keys.join(","))
    }
}

/// Compiled pipeline artifacts pushed to the device at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineArtifacts {
    /// P4Info descriptor (text protobuf) produced by the compiler.
    pub p4info: PathBuf,
    /// Device program (BMv2 JSON) produced by the compiler.
    pub device_config: PathBuf,
}

impl PipelineArtifacts {
    /// Check that both artifact files exist before anything connects.
    pub fn verify(&self) -> Result<(), ConfigError> {
        for (kind, path) in [("P4Info file", &self.p4info), ("BMv2 JSON file", &self.device_config)] {
            if !path.is_file() {
                return Err(ConfigError::InputNotFound(format!("{kind} {}", path.display())));
            }
        }
        Ok(())
    }
}

/// Switch control interface consumed by the control loop.
pub trait SwitchControl {
    /// Open the session and become primary controller for the device.
    fn establish_session(&mut self) -> Result<(), DeviceError>;

    /// Install the forwarding pipeline.
    fn push_config(&mut self, artifacts: &PipelineArtifacts) -> Result<(), DeviceError>;

    /// Release the session. Called exactly once when the controller stops.
    fn teardown(&mut self) -> Result<(), DeviceError>;

    fn read_table_entries(&mut self, table: &str) -> Result<Vec<TableEntry>, DeviceError>;

    fn write_table_entry(&mut self, entry: &TableWrite) -> Result<(), DeviceError>;

    fn read_register(&mut self, name: &str) -> Result<u64, DeviceError>;

    fn write_register(&mut self, name: &str, value: u64) -> Result<(), DeviceError>;

    /// Zero the direct counter of the entry in `table` whose `field` matches `value`.
    fn clear_counter(&mut self, table: &str, field: &str, value: u64) -> Result<(), DeviceError>;
}

impl<T: SwitchControl + ?Sized> SwitchControl for Box<T> {
    fn establish_session(&mut self) -> Result<(), DeviceError> {
        (**self).establish_session()
    }

    fn push_config(&mut self, artifacts: &PipelineArtifacts) -> Result<(), DeviceError> {
        (**self).push_config(artifacts)
    }

    fn teardown(&mut self) -> Result<(), DeviceError> {
        (**self).teardown()
    }

    fn read_table_entries(&mut self, table: &str) -> Result<Vec<TableEntry>, DeviceError> {
        (**self).read_table_entries(table)
    }

    fn write_table_entry(&mut self, entry: &TableWrite) -> Result<(), DeviceError> {
        (**self).write_table_entry(entry)
    }

    fn read_register(&mut self, name: &str) -> Result<u64, DeviceError> {
        (**self).read_register(name)
    }

    fn write_register(&mut self, name: &str, value: u64) -> Result<(), DeviceError> {
        (**self).write_register(name, value)
    }

    fn clear_counter(&mut self, table: &str, field: &str, value: u64) -> Result<(), DeviceError> {
        (**self).clear_counter(table, field, value)
    }
}
