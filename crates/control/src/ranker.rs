//! Rank-based priority reassignment.
//!
//! Clusters are ordered by the bytes their queue carried since the last
//! counter clear; the busiest cluster gets priority `N-1`, the quietest `0`.
//! The sort is stable over registry load order, so among equal counts the
//! cluster loaded first ranks higher. With every count at zero the result
//! is therefore the same permutation on every run.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info};
use turbo_core::{ClusterId, DeviceLayout, DeviceError, SwitchControl, TableWrite};

use crate::registry::{ClusterRegistry, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriorityAssignment {
    pub cluster_id: ClusterId,
    pub previous: Priority,
    pub priority: Priority,
    pub byte_count: u64,
}

impl PriorityAssignment {
    pub fn changed(&self) -> bool {
        self.previous != self.priority
    }
}

/// Result of one ranking pass, in rank order (highest priority first).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RankOutcome {
    pub assignments: Vec<PriorityAssignment>,
}

impl RankOutcome {
    pub fn changed(&self) -> usize {
        self.assignments.iter().filter(|a| a.changed()).count()
    }
}

/// Recompute every cluster's priority from its current byte count.
pub fn rank(registry: &mut ClusterRegistry) -> RankOutcome {
    let mut order: Vec<(ClusterId, u64, Priority)> = registry
        .iter()
        .map(|c| (c.id(), c.byte_count(), c.priority()))
        .collect();
    order.sort_by(|a, b| b.1.cmp(&a.1));

    let n = order.len() as Priority;
    let mut assignments = Vec::with_capacity(order.len());
    for (rank, (id, bytes, previous)) in order.into_iter().enumerate() {
        let priority = n - 1 - rank as Priority;
        registry.set_priority(id, priority);
        assignments.push(PriorityAssignment {
            cluster_id: id,
            previous,
            priority,
            byte_count: bytes,
        });
    }

    debug_assert!(registry.check_permutation().is_ok());
    RankOutcome { assignments }
}

/// Push a ranking to the device: every cluster's priority mapping (written
/// unconditionally), then a clear of every queue's byte counter.
///
/// The counters must be cleared for the next ranking to see only the traffic
/// of its own interval; a failure here is returned and ends the loop.
pub fn apply(
    device: &mut dyn SwitchControl,
    layout: &DeviceLayout,
    outcome: &RankOutcome,
    num_queues: usize,
) -> Result<(), DeviceError> {
    for a in &outcome.assignments {
        let write = priority_write(layout, a.cluster_id, a.priority);
        device.write_table_entry(&write)?;
        info!(
            cluster_id = a.cluster_id,
            priority = a.priority,
            previous = a.previous,
            byte_count = a.byte_count,
            "priority written"
        );
    }

    clear_queue_counters(device, layout, num_queues)
}

/// Zero the byte counter of every queue `0..num_queues`.
pub fn clear_queue_counters(
    device: &mut dyn SwitchControl,
    layout: &DeviceLayout,
    num_queues: usize,
) -> Result<(), DeviceError> {
    let names = layout.names();
    for qid in 0..num_queues as u64 {
        device.clear_counter(&names.queue_counter_table, &names.queue_id_field, qid)?;
    }
    debug!(queues = num_queues, table = %names.queue_counter_table, "queue counters cleared");
    Ok(())
}

/// The `cluster_id -> qid` entry for one cluster.
pub fn priority_write(layout: &DeviceLayout, cluster_id: ClusterId, priority: Priority) -> TableWrite {
    let names = layout.names();
    let mut match_fields = IndexMap::new();
    match_fields.insert(names.cluster_id_field.clone(), cluster_id);
    let mut params = IndexMap::new();
    params.insert(names.priority_param.clone(), priority as u64);
    TableWrite {
        table: names.priority_table.clone(),
        match_fields,
        action: names.set_priority_action.clone(),
        params,
    }
}
