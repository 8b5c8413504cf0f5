//! In-process model of the forwarding device.
//!
//! Holds tables with direct counters and a flat register file in memory and
//! implements [`SwitchControl`] over them. The controller binary uses it as
//! its `simulated` backend; tests use it to seed device state, inject
//! traffic, script failures and inspect what the control loop wrote.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{DeviceError, DeviceOp};
use crate::layout::{ClusterId, LayoutNames};
use crate::switch::{CounterData, PipelineArtifacts, SwitchControl, TableEntry, TableWrite};

/// Egress port field keying the per-channel counter tables.
const EGRESS_PORT_FIELD: &str = "standard_metadata.egress_port";

#[derive(Debug, Default)]
pub struct SimulatedSwitch {
    session_open: bool,
    artifacts: Option<PipelineArtifacts>,
    tables: HashMap<String, Vec<TableEntry>>,
    registers: HashMap<String, u64>,
    /// Operations that fail on their next call.
    fail_next: HashSet<DeviceOp>,
    /// Every successful call, in order: (op, target).
    journal: Vec<(DeviceOp, String)>,
}

impl SimulatedSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device preloaded with the ACC-Turbo pipeline objects: `num_clusters`
    /// clusters with ids `1..=num_clusters` mapped to queue `id - 1`, one
    /// byte counter per queue, zeroed feature registers, and two entries in
    /// each egress channel table.
    pub fn with_pipeline(names: &LayoutNames, num_clusters: usize, features: &[String]) -> Self {
        let mut sim = Self::new();

        for id in 1..=num_clusters as u64 {
            sim.insert_entry(
                &names.priority_table,
                entry(&names.cluster_id_field, id, Some((&names.priority_param, id - 1))),
            );
            for feature in features {
                let base = format!("{}.cluster{}_{}", names.feature_register_prefix, id, feature);
                sim.set_register(&format!("{base}_min"), 0);
                sim.set_register(&format!("{base}_max"), 0);
            }
        }
        for qid in 0..num_clusters as u64 {
            sim.insert_entry(&names.queue_counter_table, entry(&names.queue_id_field, qid, None));
        }
        for port in 1..=2 {
            sim.insert_entry(&names.benign_counter_table, entry(EGRESS_PORT_FIELD, port, None));
            sim.insert_entry(&names.malicious_counter_table, entry(EGRESS_PORT_FIELD, port, None));
        }

        sim.set_register(&names.init_register, 0);
        sim.set_register(&names.update_clusters_register, 0);
        sim.set_register(&names.timestamp_register, 0);
        sim
    }

    // ── Seeding & inspection ────────────────────────────────────────

    pub fn insert_entry(&mut self, table: &str, entry: TableEntry) {
        self.tables.entry(table.to_string()).or_default().push(entry);
    }

    pub fn entries(&self, table: &str) -> &[TableEntry] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_register(&mut self, name: &str, value: u64) {
        self.registers.insert(name.to_string(), value);
    }

    pub fn register(&self, name: &str) -> Option<u64> {
        self.registers.get(name).copied()
    }

    /// Add traffic to the entry in `table` whose `field` equals `value`.
    /// Returns false when no such entry exists.
    pub fn add_bytes(&mut self, table: &str, field: &str, value: u64, bytes: u64) -> bool {
        let Some(entries) = self.tables.get_mut(table) else {
            return false;
        };
        match entries.iter_mut().find(|e| e.match_fields.get(field) == Some(&value)) {
            Some(e) => {
                e.counter.byte_count += bytes;
                e.counter.packet_count += 1;
                true
            }
            None => false,
        }
    }

    /// Overwrite a counter outright (e.g. to model a device reset).
    pub fn set_byte_count(&mut self, table: &str, field: &str, value: u64, bytes: u64) -> bool {
        let Some(entries) = self.tables.get_mut(table) else {
            return false;
        };
        match entries.iter_mut().find(|e| e.match_fields.get(field) == Some(&value)) {
            Some(e) => {
                e.counter.byte_count = bytes;
                true
            }
            None => false,
        }
    }

    /// Queue id currently assigned to `cluster` in the priority table.
    pub fn priority_of(&self, names: &LayoutNames, cluster: ClusterId) -> Option<u64> {
        self.entries(&names.priority_table)
            .iter()
            .find(|e| e.match_fields.get(&names.cluster_id_field) == Some(&cluster))
            .and_then(|e| e.action_params.get(&names.priority_param).copied())
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&mut self, op: DeviceOp) {
        self.fail_next.insert(op);
    }

    pub fn journal(&self) -> &[(DeviceOp, String)] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn is_session_open(&self) -> bool {
        self.session_open
    }

    pub fn artifacts(&self) -> Option<&PipelineArtifacts> {
        self.artifacts.as_ref()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn check(&mut self, op: DeviceOp, target: &str, write: bool) -> Result<(), DeviceError> {
        if !self.session_open {
            return Err(DeviceError::session(op, format!("no open session (target {target})")));
        }
        if self.fail_next.remove(&op) {
            let reason = "injected failure";
            return Err(if write {
                DeviceError::write(op, target, reason)
            } else {
                DeviceError::read(op, target, reason)
            });
        }
        Ok(())
    }

    fn record(&mut self, op: DeviceOp, target: impl Into<String>) {
        let target = target.into();
        debug!(op = %op, target = %target, "simulated device call");
        self.journal.push((op, target));
    }
}

fn entry(field: &str, value: u64, param: Option<(&String, u64)>) -> TableEntry {
    let mut match_fields = IndexMap::new();
    match_fields.insert(field.to_string(), value);
    let mut action_params = IndexMap::new();
    if let Some((name, v)) = param {
        action_params.insert(name.clone(), v);
    }
    TableEntry {
        match_fields,
        action_params,
        counter: CounterData::default(),
    }
}

impl SwitchControl for SimulatedSwitch {
    fn establish_session(&mut self) -> Result<(), DeviceError> {
        if self.fail_next.remove(&DeviceOp::EstablishSession) {
            return Err(DeviceError::session(DeviceOp::EstablishSession, "injected failure"));
        }
        self.session_open = true;
        self.record(DeviceOp::EstablishSession, "session");
        Ok(())
    }

    fn push_config(&mut self, artifacts: &PipelineArtifacts) -> Result<(), DeviceError> {
        self.check(DeviceOp::PushConfig, "pipeline", true)?;
        self.artifacts = Some(artifacts.clone());
        self.record(DeviceOp::PushConfig, artifacts.device_config.display().to_string());
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), DeviceError> {
        if !self.session_open {
            return Err(DeviceError::session(DeviceOp::Teardown, "session already closed"));
        }
        self.session_open = false;
        self.record(DeviceOp::Teardown, "session");
        Ok(())
    }

    fn read_table_entries(&mut self, table: &str) -> Result<Vec<TableEntry>, DeviceError> {
        self.check(DeviceOp::ReadTableEntries, table, false)?;
        let entries = self
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| DeviceError::read(DeviceOp::ReadTableEntries, table, "unknown table"))?;
        self.record(DeviceOp::ReadTableEntries, table);
        Ok(entries)
    }

    fn write_table_entry(&mut self, write: &TableWrite) -> Result<(), DeviceError> {
        let target = write.target();
        self.check(DeviceOp::WriteTableEntry, &target, true)?;
        let entries = self.tables.get_mut(&write.table).ok_or_else(|| {
            DeviceError::write(DeviceOp::WriteTableEntry, target.clone(), "unknown table")
        })?;

        match entries.iter_mut().find(|e| e.match_fields == write.match_fields) {
            Some(existing) => existing.action_params = write.params.clone(),
            None => entries.push(TableEntry {
                match_fields: write.match_fields.clone(),
                action_params: write.params.clone(),
                counter: CounterData::default(),
            }),
        }
        self.record(DeviceOp::WriteTableEntry, target);
        Ok(())
    }

    fn read_register(&mut self, name: &str) -> Result<u64, DeviceError> {
        self.check(DeviceOp::ReadRegister, name, false)?;
        let value = self
            .registers
            .get(name)
            .copied()
            .ok_or_else(|| DeviceError::read(DeviceOp::ReadRegister, name, "unknown register"))?;
        self.record(DeviceOp::ReadRegister, name);
        Ok(value)
    }

    fn write_register(&mut self, name: &str, value: u64) -> Result<(), DeviceError> {
        self.check(DeviceOp::WriteRegister, name, true)?;
        match self.registers.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                return Err(DeviceError::write(DeviceOp::WriteRegister, name, "unknown register"))
            }
        }
        self.record(DeviceOp::WriteRegister, name);
        Ok(())
    }

    fn clear_counter(&mut self, table: &str, field: &str, value: u64) -> Result<(), DeviceError> {
        let target = format!("{table}[{field}={value}]");
        self.check(DeviceOp::ClearCounter, &target, true)?;
        let entries = self.tables.get_mut(table).ok_or_else(|| {
            DeviceError::write(DeviceOp::ClearCounter, target.clone(), "unknown table")
        })?;
        for e in entries.iter_mut().filter(|e| e.match_fields.get(field) == Some(&value)) {
            e.counter = CounterData::default();
        }
        self.record(DeviceOp::ClearCounter, target);
        Ok(())
    }
}
