//! Config schema types (cluster routing, engine settings lookup, daemons).
use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub cluster: ClusterConfig,
    pub engines: EnginesConfig,
    /// Per-daemon settings, keyed by daemon entry id.
    pub daemons: HashMap<String, DaemonConfig>,
}

impl VigilConfig {
    /// Whether the daemon with `entry_id` must not run concurrently across
    /// cluster nodes. Unknown daemons default to `false`.
    pub fn disallows_cluster_concurrency(&self, entry_id: &str) -> bool {
        self.daemons
            .get(entry_id)
            .is_some_and(|d| d.disallow_cluster_concurrent_execution)
    }
}

/// Cluster routing switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
}

/// Where the per-engine settings files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    /// Directory searched for engine settings files.
    pub resource_dir: PathBuf,
    /// Wildcard locating the local engine settings.
    pub local_pattern: String,
    /// Wildcard locating the clustered engine settings.
    pub clustered_pattern: String,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            resource_dir: PathBuf::from("."),
            local_pattern: "**/scheduler-local.toml".into(),
            clustered_pattern: "**/scheduler-cluster.toml".into(),
        }
    }
}

/// A daemon entry declared in config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub disallow_cluster_concurrent_execution: bool,
    /// Cron expression; takes precedence over `interval_secs` when non-empty.
    pub cron: Option<String>,
    pub interval_secs: Option<u64>,
    /// Shell program run by the command-line host.
    pub command: Option<String>,
    pub args: Vec<String>,
}

/// Settings for one trigger engine instance, read from its own file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub instance_name: String,
    /// Maximum number of concurrently running fires.
    pub thread_count: usize,
    /// How long the timer sleeps when nothing is due.
    pub idle_wait_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            instance_name: "vigil".into(),
            thread_count: 4,
            idle_wait_ms: 30_000,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: VigilConfig = toml::from_str("").unwrap();
        assert!(!cfg.cluster.enabled);
        assert_eq!(cfg.engines.local_pattern, "**/scheduler-local.toml");
        assert!(cfg.daemons.is_empty());
    }

    #[test]
    fn daemon_cluster_flag() {
        let cfg: VigilConfig = toml::from_str(
            r#"
            [cluster]
            enabled = true

            [daemons.mail-digest]
            disallow_cluster_concurrent_execution = true
            interval_secs = 60

            [daemons.indexer]
            cron = "0 0 3 * * *"
            "#,
        )
        .unwrap();
        assert!(cfg.cluster.enabled);
        assert!(cfg.disallows_cluster_concurrency("mail-digest"));
        assert!(!cfg.disallows_cluster_concurrency("indexer"));
        assert!(!cfg.disallows_cluster_concurrency("unknown"));
        assert_eq!(cfg.daemons["mail-digest"].interval_secs, Some(60));
    }

    #[test]
    fn engine_settings_partial_file() {
        let settings: EngineSettings = toml::from_str("thread_count = 2").unwrap();
        assert_eq!(settings.thread_count, 2);
        assert_eq!(settings.instance_name, "vigil");
        assert_eq!(settings.idle_wait_ms, 30_000);
    }
}
