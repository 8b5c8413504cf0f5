//! Device object names addressed by the control loop.
//!
//! [`LayoutNames`] is the configurable part (what the pipeline calls its
//! tables and registers). [`DeviceLayout`] is resolved once at startup from
//! the names plus the loaded cluster ids, so nothing inside the loop builds
//! register names on the fly.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Identifier of a cluster as stored in the device priority table.
pub type ClusterId = u64;

/// Table, register and field names of the forwarding pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutNames {
    /// Priority table: cluster id -> queue id.
    #[serde(default = "default_priority_table")]
    pub priority_table: String,
    #[serde(default = "default_cluster_id_field")]
    pub cluster_id_field: String,
    #[serde(default = "default_set_priority_action")]
    pub set_priority_action: String,
    #[serde(default = "default_priority_param")]
    pub priority_param: String,

    /// Per-queue byte counter table read and cleared by the ranker.
    #[serde(default = "default_queue_counter_table")]
    pub queue_counter_table: String,
    #[serde(default = "default_queue_id_field")]
    pub queue_id_field: String,

    /// Prefix of the per-cluster feature registers:
    /// `{prefix}.cluster{id}_{feature}_min` / `_max`.
    #[serde(default = "default_feature_register_prefix")]
    pub feature_register_prefix: String,

    /// Set to 1 once the feature registers have been reset.
    #[serde(default = "default_init_register")]
    pub init_register: String,
    #[serde(default = "default_update_clusters_register")]
    pub update_clusters_register: String,

    /// Coarse device clock sampled by the throughput tracker.
    #[serde(default = "default_timestamp_register")]
    pub timestamp_register: String,
    #[serde(default = "default_benign_counter_table")]
    pub benign_counter_table: String,
    #[serde(default = "default_malicious_counter_table")]
    pub malicious_counter_table: String,
}

fn default_priority_table() -> String { "MyIngress.cluster_to_prio".into() }
fn default_cluster_id_field() -> String { "meta.rs.cluster_id".into() }
fn default_set_priority_action() -> String { "MyIngress.set_qid".into() }
fn default_priority_param() -> String { "qid".into() }
fn default_queue_counter_table() -> String { "MyIngress.do_bytes_count".into() }
fn default_queue_id_field() -> String { "queue_id".into() }
fn default_feature_register_prefix() -> String { "MyIngress".into() }
fn default_init_register() -> String { "MyIngress.init_counter".into() }
fn default_update_clusters_register() -> String { "MyIngress.updateclusters_counter".into() }
fn default_timestamp_register() -> String { "MyEgress.timestamp".into() }
fn default_benign_counter_table() -> String { "MyEgress.do_bytes_count_benign_egress".into() }
fn default_malicious_counter_table() -> String { "MyEgress.do_bytes_count_malicious_egress".into() }

impl Default for LayoutNames {
    fn default() -> Self {
        Self {
            priority_table: default_priority_table(),
            cluster_id_field: default_cluster_id_field(),
            set_priority_action: default_set_priority_action(),
            priority_param: default_priority_param(),
            queue_counter_table: default_queue_counter_table(),
            queue_id_field: default_queue_id_field(),
            feature_register_prefix: default_feature_register_prefix(),
            init_register: default_init_register(),
            update_clusters_register: default_update_clusters_register(),
            timestamp_register: default_timestamp_register(),
            benign_counter_table: default_benign_counter_table(),
            malicious_counter_table: default_malicious_counter_table(),
        }
    }
}

/// Min/max register pair holding one feature's range for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRegisters {
    pub min: String,
    pub max: String,
}

/// Names resolved for a fixed set of clusters and features.
#[derive(Debug, Clone)]
pub struct DeviceLayout {
    names: LayoutNames,
    features: Vec<String>,
    feature_registers: HashMap<(ClusterId, String), FeatureRegisters>,
    /// Cluster ids in load order, so iteration is deterministic.
    clusters: Vec<ClusterId>,
}

impl DeviceLayout {
    /// Resolve every feature register for `clusters` x `features`.
    pub fn resolve(names: LayoutNames, clusters: &[ClusterId], features: &[String]) -> Self {
        let mut feature_registers = HashMap::with_capacity(clusters.len() * features.len());
        for &cluster in clusters {
            for feature in features {
                let base = format!("{}.cluster{}_{}", names.feature_register_prefix, cluster, feature);
                feature_registers.insert(
                    (cluster, feature.clone()),
                    FeatureRegisters {
                        min: format!("{base}_min"),
                        max: format!("{base}_max"),
                    },
                );
            }
        }

        Self {
            names,
            features: features.to_vec(),
            feature_registers,
            clusters: clusters.to_vec(),
        }
    }

    pub fn names(&self) -> &LayoutNames {
        &self.names
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Registers for `(cluster, feature)`, if both were part of the resolution.
    pub fn feature_registers(&self, cluster: ClusterId, feature: &str) -> Option<&FeatureRegisters> {
        self.feature_registers.get(&(cluster, feature.to_string()))
    }

    /// All feature registers, grouped per cluster in load order and per
    /// feature in configured order.
    pub fn feature_registers_by_cluster(&self) -> Vec<(ClusterId, IndexMap<&str, &FeatureRegisters>)> {
        self.clusters
            .iter()
            .map(|&cluster| {
                let regs = self
                    .features
                    .iter()
                    .filter_map(|f| {
                        self.feature_registers
                            .get(&(cluster, f.clone()))
                            .map(|r| (f.as_str(), r))
                    })
                    .collect();
                (cluster, regs)
            })
            .collect()
    }
}
