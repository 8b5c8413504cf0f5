//! Fixed set of traffic clusters and their priority / byte-count state.
//!
//! Priorities always form a permutation of `0..len()`; `N-1` is the highest.
//! Both lookups (`by_id`, `by_priority`) are index maps kept in step with
//! every mutation, so neither scans the cluster list.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use turbo_core::{ClusterId, TableEntry};

use crate::error::RegistryError;

/// Priority (queue id) of a cluster.
pub type Priority = u32;

/// Range of one feature as tracked by the data plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureRange {
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    id: ClusterId,
    priority: Priority,
    byte_count: u64,
    features: IndexMap<String, FeatureRange>,
}

impl Cluster {
    fn new(id: ClusterId, priority: Priority, features: &[String]) -> Self {
        Self {
            id,
            priority,
            byte_count: 0,
            features: features
                .iter()
                .map(|f| (f.clone(), FeatureRange::default()))
                .collect(),
        }
    }

    pub fn id(&self) -> ClusterId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Bytes seen on this cluster's queue since the last counter clear.
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    pub fn features(&self) -> &IndexMap<String, FeatureRange> {
        &self.features
    }
}

#[derive(Debug, Clone)]
pub struct ClusterRegistry {
    /// Clusters in load order.
    clusters: Vec<Cluster>,
    by_id: HashMap<ClusterId, usize>,
    /// `by_priority[p]` is the index of the cluster holding priority `p`.
    by_priority: Vec<usize>,
}

impl ClusterRegistry {
    /// Build the registry from the device priority table.
    ///
    /// Each row contributes one cluster: id from the first match field,
    /// priority from the first action parameter.
    pub fn load(table: &str, rows: &[TableEntry], features: &[String]) -> Result<Self, RegistryError> {
        let parsed = parse_rows(table, rows)?;
        let found: Vec<Priority> = parsed.iter().map(|&(_, p)| p).collect();

        let mut by_priority = vec![usize::MAX; parsed.len()];
        for (idx, &p) in found.iter().enumerate() {
            match by_priority.get_mut(p as usize) {
                Some(slot) if *slot == usize::MAX => *slot = idx,
                _ => {
                    let mut found = found.clone();
                    found.sort_unstable();
                    return Err(RegistryError::InconsistentPriorities {
                        expected: parsed.len(),
                        found,
                    });
                }
            }
        }

        Ok(Self::build(parsed, features, by_priority))
    }

    /// Like [`load`](Self::load), but instead of rejecting a priority set that
    /// is not a permutation, reassigns priorities by load order (first row
    /// gets `N-1`). Used to resume against a device left half-updated.
    pub fn load_reassigning(
        table: &str,
        rows: &[TableEntry],
        features: &[String],
    ) -> Result<Self, RegistryError> {
        let mut parsed = parse_rows(table, rows)?;
        let n = parsed.len();
        let mut by_priority = vec![0; n];
        for (idx, (_, p)) in parsed.iter_mut().enumerate() {
            *p = (n - 1 - idx) as Priority;
            by_priority[*p as usize] = idx;
        }
        Ok(Self::build(parsed, features, by_priority))
    }

    fn build(parsed: Vec<(ClusterId, Priority)>, features: &[String], by_priority: Vec<usize>) -> Self {
        let by_id = parsed
            .iter()
            .enumerate()
            .map(|(idx, &(id, _))| (id, idx))
            .collect();
        let clusters = parsed
            .into_iter()
            .map(|(id, p)| Cluster::new(id, p, features))
            .collect();
        Self {
            clusters,
            by_id,
            by_priority,
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Clusters in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter()
    }

    pub fn ids(&self) -> Vec<ClusterId> {
        self.clusters.iter().map(|c| c.id).collect()
    }

    pub fn by_id(&self, id: ClusterId) -> Option<&Cluster> {
        self.by_id.get(&id).map(|&idx| &self.clusters[idx])
    }

    pub fn by_priority(&self, priority: Priority) -> Option<&Cluster> {
        self.by_priority
            .get(priority as usize)
            .map(|&idx| &self.clusters[idx])
    }

    /// Move `id` to `priority`; the cluster previously holding `priority`
    /// takes over `id`'s old slot, so the set stays a permutation.
    ///
    /// Returns the previous priority, or `None` if `id` is unknown or
    /// `priority` is out of range.
    pub(crate) fn set_priority(&mut self, id: ClusterId, priority: Priority) -> Option<Priority> {
        let idx = *self.by_id.get(&id)?;
        let holder = *self.by_priority.get(priority as usize)?;
        let previous = self.clusters[idx].priority;
        if holder != idx {
            self.clusters[holder].priority = previous;
            self.by_priority[previous as usize] = holder;
            self.clusters[idx].priority = priority;
            self.by_priority[priority as usize] = idx;
        }
        Some(previous)
    }

    /// Store the counter value read for queue `priority`. Returns the id of
    /// the cluster currently on that queue.
    pub fn record_byte_count(&mut self, priority: Priority, bytes: u64) -> Option<ClusterId> {
        let idx = *self.by_priority.get(priority as usize)?;
        let cluster = &mut self.clusters[idx];
        cluster.byte_count = bytes;
        Some(cluster.id)
    }

    pub fn reset_byte_counts(&mut self) {
        for cluster in &mut self.clusters {
            cluster.byte_count = 0;
        }
    }

    pub fn record_feature_range(&mut self, id: ClusterId, feature: &str, range: FeatureRange) -> bool {
        let Some(&idx) = self.by_id.get(&id) else {
            return false;
        };
        match self.clusters[idx].features.get_mut(feature) {
            Some(slot) => {
                *slot = range;
                true
            }
            None => false,
        }
    }

    /// Verify priorities are exactly `0..len()`.
    pub fn check_permutation(&self) -> Result<(), RegistryError> {
        let mut found: Vec<Priority> = self.clusters.iter().map(|c| c.priority).collect();
        found.sort_unstable();
        let ok = found.iter().enumerate().all(|(i, &p)| i as Priority == p)
            && self
                .by_priority
                .iter()
                .enumerate()
                .all(|(p, &idx)| self.clusters[idx].priority as usize == p);
        if ok {
            Ok(())
        } else {
            Err(RegistryError::InconsistentPriorities {
                expected: self.clusters.len(),
                found,
            })
        }
    }
}

fn parse_rows(table: &str, rows: &[TableEntry]) -> Result<Vec<(ClusterId, Priority)>, RegistryError> {
    if rows.is_empty() {
        return Err(RegistryError::Empty {
            table: table.to_string(),
        });
    }

    let mut seen = HashMap::with_capacity(rows.len());
    let mut parsed = Vec::with_capacity(rows.len());
    for (row, entry) in rows.iter().enumerate() {
        let id = entry.first_match().ok_or_else(|| RegistryError::MalformedRow {
            table: table.to_string(),
            row,
            what: "cluster id match field",
        })?;
        let priority = entry.first_param().ok_or_else(|| RegistryError::MalformedRow {
            table: table.to_string(),
            row,
            what: "priority action parameter",
        })?;
        if seen.insert(id, row).is_some() {
            return Err(RegistryError::DuplicateId {
                table: table.to_string(),
                id,
            });
        }
        parsed.push((id, Priority::try_from(priority).unwrap_or(Priority::MAX)));
    }
    Ok(parsed)
}
