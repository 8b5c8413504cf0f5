use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layout::LayoutNames;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Top-level config ──────────────────────────────────────────

/// Full controller configuration.
///
/// Parsed from TOML, then `TURBO_*` environment overrides are applied, then
/// the binary layers its command-line flags on top. Call [`validate`] before
/// use: several settings (notably the ranking interval) have no default.
///
/// [`validate`]: ControllerConfig::validate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub clusters: ClusterConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub throughput: ThroughputConfig,
    #[serde(default)]
    pub layout: LayoutNames,
}

// ── Section configs ─────────────────────────────────────────────────

/// Which device session backs the switch control interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process device model.
    Simulated,
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulated" => Ok(Backend::Simulated),
            other => Err(ConfigError::Invalid {
                key: "device.backend",
                reason: format!("unknown backend '{other}', expected 'simulated'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default = "default_device_address")]
    pub address: String,
    #[serde(default)]
    pub device_id: u64,
}

fn default_backend() -> Backend { Backend::Simulated }
fn default_device_name() -> String { "s1".into() }
fn default_device_address() -> String { "127.0.0.1:50051".into() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            name: default_device_name(),
            address: default_device_address(),
            device_id: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of clusters (and priority queues) the pipeline was built with.
    #[serde(default = "default_num_clusters")]
    pub num_clusters: usize,
    /// Features whose min/max ranges the data plane tracks per cluster.
    #[serde(default = "default_features")]
    pub features: Vec<String>,
}

fn default_num_clusters() -> usize { 4 }
fn default_features() -> Vec<String> {
    ["dst0", "dst1", "dst2", "dst3"].iter().map(|s| s.to_string()).collect()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_clusters: default_num_clusters(),
            features: default_features(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Ranking interval in seconds. Required, no default.
    #[serde(default)]
    pub rank_interval_secs: Option<u64>,
    #[serde(default = "default_throughput_interval")]
    pub throughput_interval_secs: u64,
    /// How often the loop wakes to check for due tasks.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

fn default_throughput_interval() -> u64 { 9 }
fn default_tick_millis() -> u64 { 1000 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rank_interval_secs: None,
            throughput_interval_secs: default_throughput_interval(),
            tick_millis: default_tick_millis(),
        }
    }
}

impl ScheduleConfig {
    /// Ranking interval; errors when it was never supplied.
    pub fn rank_interval(&self) -> Result<Duration, ConfigError> {
        self.rank_interval_secs
            .map(Duration::from_secs)
            .ok_or(ConfigError::Missing("schedule.rank_interval_secs"))
    }

    pub fn throughput_interval(&self) -> Duration {
        Duration::from_secs(self.throughput_interval_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_benign_path")]
    pub benign_path: PathBuf,
    #[serde(default = "default_malicious_path")]
    pub malicious_path: PathBuf,
    /// Bits the device drops from the clock register before exporting it.
    #[serde(default = "default_timestamp_shift")]
    pub timestamp_shift: u32,
}

fn default_true() -> bool { true }
fn default_benign_path() -> PathBuf { "accturbo_throughput_benign.dat".into() }
fn default_malicious_path() -> PathBuf { "accturbo_throughput_malicious.dat".into() }
fn default_timestamp_shift() -> u32 { 16 }

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            benign_path: default_benign_path(),
            malicious_path: default_malicious_path(),
            timestamp_shift: default_timestamp_shift(),
        }
    }
}

// ── Loading & Validation ────────────────────────────────────────────

impl ControllerConfig {
    /// Parse config from a TOML string and apply environment overrides.
    ///
    /// Does not validate; callers layer CLI flags first, then call
    /// [`ControllerConfig::validate`].
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply `TURBO_*` environment overrides.
    ///
    /// - `TURBO_DEVICE_BACKEND` → `device.backend`
    /// - `TURBO_DEVICE_ADDRESS` → `device.address`
    /// - `TURBO_NUM_CLUSTERS` → `clusters.num_clusters`
    /// - `TURBO_RANK_INTERVAL_SECS` → `schedule.rank_interval_secs`
    /// - `TURBO_THROUGHPUT_INTERVAL_SECS` → `schedule.throughput_interval_secs`
    /// - `TURBO_TICK_MILLIS` → `schedule.tick_millis`
    /// - `TURBO_THROUGHPUT_ENABLED` → `throughput.enabled`
    /// - `TURBO_BENIGN_PATH` / `TURBO_MALICIOUS_PATH` → throughput sink paths
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TURBO_DEVICE_BACKEND") {
            self.device.backend = v.parse()?;
        }
        if let Some(v) = lookup("TURBO_DEVICE_ADDRESS") {
            self.device.address = v;
        }
        if let Some(v) = lookup("TURBO_NUM_CLUSTERS") {
            self.clusters.num_clusters = parse_number("clusters.num_clusters", &v)?;
        }
        if let Some(v) = lookup("TURBO_RANK_INTERVAL_SECS") {
            self.schedule.rank_interval_secs = Some(parse_number("schedule.rank_interval_secs", &v)?);
        }
        if let Some(v) = lookup("TURBO_THROUGHPUT_INTERVAL_SECS") {
            self.schedule.throughput_interval_secs =
                parse_number("schedule.throughput_interval_secs", &v)?;
        }
        if let Some(v) = lookup("TURBO_TICK_MILLIS") {
            self.schedule.tick_millis = parse_number("schedule.tick_millis", &v)?;
        }
        if let Some(v) = lookup("TURBO_THROUGHPUT_ENABLED") {
            self.throughput.enabled = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "throughput.enabled",
                        reason: format!("expected a boolean, got '{other}'"),
                    })
                }
            };
        }
        if let Some(v) = lookup("TURBO_BENIGN_PATH") {
            self.throughput.benign_path = v.into();
        }
        if let Some(v) = lookup("TURBO_MALICIOUS_PATH") {
            self.throughput.malicious_path = v.into();
        }
        Ok(())
    }

    // ── Validation ──────────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rank = self.schedule.rank_interval()?;
        if rank.is_zero() {
            return Err(invalid("schedule.rank_interval_secs", "must be greater than zero"));
        }
        if self.throughput.enabled && self.schedule.throughput_interval_secs == 0 {
            return Err(invalid("schedule.throughput_interval_secs", "must be greater than zero"));
        }
        if self.schedule.tick_millis == 0 {
            return Err(invalid("schedule.tick_millis", "must be greater than zero"));
        }
        if self.clusters.num_clusters == 0 {
            return Err(invalid("clusters.num_clusters", "at least one cluster is required"));
        }
        if self.clusters.features.is_empty() {
            return Err(invalid("clusters.features", "at least one feature is required"));
        }
        if self.throughput.timestamp_shift >= 64 {
            return Err(invalid("throughput.timestamp_shift", "must be below 64"));
        }
        if self.throughput.enabled && self.throughput.benign_path == self.throughput.malicious_path {
            return Err(invalid(
                "throughput.malicious_path",
                "benign and malicious sinks must be different files",
            ));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  device:      backend={:?}, name={}, address={}, id={}",
            self.device.backend,
            self.device.name,
            self.device.address,
            self.device.device_id
        );
        tracing::info!(
            "  clusters:    count={}, features={:?}",
            self.clusters.num_clusters,
            self.clusters.features
        );
        tracing::info!(
            "  schedule:    rank={}, throughput={}s, tick={}ms",
            self.schedule
                .rank_interval_secs
                .map(|s| format!("{s}s"))
                .unwrap_or_else(|| "(unset)".into()),
            self.schedule.throughput_interval_secs,
            self.schedule.tick_millis
        );
        tracing::info!(
            "  throughput:  enabled={}, benign={}, malicious={}",
            self.throughput.enabled,
            self.throughput.benign_path.display(),
            self.throughput.malicious_path.display()
        );
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("expected a number, got '{raw}'"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.device.backend, Backend::Simulated);
        assert_eq!(config.clusters.num_clusters, 4);
        assert_eq!(config.clusters.features, vec!["dst0", "dst1", "dst2", "dst3"]);
        assert_eq!(config.schedule.rank_interval_secs, None);
        assert_eq!(config.schedule.throughput_interval(), Duration::from_secs(9));
        assert_eq!(config.schedule.tick(), Duration::from_secs(1));
        assert_eq!(config.throughput.timestamp_shift, 16);
        assert_eq!(config.layout, LayoutNames::default());
    }

    #[test]
    fn missing_rank_interval_is_rejected() {
        let config = ControllerConfig::default();
        match config.validate() {
            Err(ConfigError::Missing(key)) => assert_eq!(key, "schedule.rank_interval_secs"),
            other => panic!("expected missing rank interval, got {other:?}"),
        }
    }

    #[test]
    fn parses_toml_sections() {
        let toml = r#"
            [clusters]
            num_clusters = 2
            features = ["len", "ttl"]

            [schedule]
            rank_interval_secs = 5
            tick_millis = 250

            [throughput]
            enabled = false

            [layout]
            priority_table = "Ingress.prio"
        "#;
        let mut config: ControllerConfig = toml::from_str(toml).unwrap();
        config.apply_overrides(lookup(&[])).unwrap();
        config.validate().unwrap();

        assert_eq!(config.clusters.num_clusters, 2);
        assert_eq!(config.schedule.rank_interval().unwrap(), Duration::from_secs(5));
        assert_eq!(config.schedule.tick(), Duration::from_millis(250));
        assert!(!config.throughput.enabled);
        assert_eq!(config.layout.priority_table, "Ingress.prio");
        assert_eq!(config.layout.timestamp_register, "MyEgress.timestamp");
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = ControllerConfig::default();
        config
            .apply_overrides(lookup(&[
                ("TURBO_RANK_INTERVAL_SECS", "12"),
                ("TURBO_NUM_CLUSTERS", "8"),
                ("TURBO_THROUGHPUT_ENABLED", "off"),
                ("TURBO_BENIGN_PATH", "/tmp/b.dat"),
            ]))
            .unwrap();

        assert_eq!(config.schedule.rank_interval_secs, Some(12));
        assert_eq!(config.clusters.num_clusters, 8);
        assert!(!config.throughput.enabled);
        assert_eq!(config.throughput.benign_path, PathBuf::from("/tmp/b.dat"));
    }

    #[test]
    fn bad_override_is_a_config_error() {
        let mut config = ControllerConfig::default();
        let err = config
            .apply_overrides(lookup(&[("TURBO_TICK_MILLIS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("schedule.tick_millis"));

        let err = config
            .apply_overrides(lookup(&[("TURBO_DEVICE_BACKEND", "grpc")]))
            .unwrap_err();
        assert!(err.to_string().contains("unknown backend"));
    }

    #[test]
    fn rejects_zero_values_and_shared_sinks() {
        let mut config = ControllerConfig::default();
        config.schedule.rank_interval_secs = Some(0);
        assert!(config.validate().is_err());

        config.schedule.rank_interval_secs = Some(3);
        config.clusters.num_clusters = 0;
        assert!(config.validate().is_err());

        config.clusters.num_clusters = 4;
        config.throughput.malicious_path = config.throughput.benign_path.clone();
        assert!(config.validate().is_err());

        config.throughput.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turbo.toml");
        std::fs::write(&path, "[schedule]\nrank_interval_secs = 7\n").unwrap();

        let config = ControllerConfig::from_file(&path).unwrap();
        assert!(config.schedule.rank_interval_secs.is_some());
        assert!(ControllerConfig::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn sample_config_is_valid() {
        let config: ControllerConfig =
            toml::from_str(include_str!("../../../config/turbo.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.schedule.rank_interval_secs, Some(5));
        assert_eq!(config.layout.init_register, "MyIngress.init_counter");
    }
}
