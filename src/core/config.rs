//! Configuration parsing and validation.
//!
//! Concord configuration is loaded from TOML files. Membership is static:
//! every replica ships the same `[cluster]` section, and a node finds
//! itself in it by id.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

/// Top-level Concord configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This replica's identity and bind address.
    pub node: NodeConfig,

    /// Static cluster membership and consensus tuning.
    pub cluster: ClusterConfig,

    /// Durable journal configuration.
    pub journal: JournalConfig,

    /// Pulse and garbage collection cadence.
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Telemetry and observability configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Identity of the local replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique id; must match one `[[cluster.members]]` entry.
    pub id: String,

    /// UDP bind address for the consensus transport.
    pub bind: SocketAddr,
}

/// Static membership and consensus tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// All replicas, this node included.
    pub members: Vec<MemberConfig>,

    /// Pipelining window: slots open for proposals past the applied seqn.
    #[serde(default = "default_alpha")]
    pub alpha: u64,
}

/// One replica in the static membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: String,
    pub addr: SocketAddr,
}

/// Durable journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Journal file path.
    pub path: String,
}

/// Pulse and garbage collection cadence, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_pulse_interval_ms")]
    pub pulse_interval_ms: u64,

    #[serde(default = "default_clean_interval_ms")]
    pub clean_interval_ms: u64,

    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            pulse_interval_ms: default_pulse_interval_ms(),
            clean_interval_ms: default_clean_interval_ms(),
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "concord=debug").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_alpha() -> u64 {
    50
}

fn default_pulse_interval_ms() -> u64 {
    1_000
}

fn default_clean_interval_ms() -> u64 {
    1_000
}

fn default_reap_interval_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.node.id.is_empty() {
            anyhow::bail!("node.id must not be empty");
        }
        if self.cluster.members.is_empty() {
            anyhow::bail!("cluster.members must not be empty");
        }
        let mut ids = HashSet::new();
        let mut addrs = HashSet::new();
        for m in &self.cluster.members {
            if !ids.insert(&m.id) {
                anyhow::bail!("duplicate cluster member id: {}", m.id);
            }
            if !addrs.insert(m.addr) {
                anyhow::bail!("duplicate cluster member address: {}", m.addr);
            }
        }
        let me = self
            .cluster
            .members
            .iter()
            .find(|m| m.id == self.node.id)
            .ok_or_else(|| {
                anyhow::anyhow!("node.id {:?} not present in cluster.members", self.node.id)
            })?;
        if me.addr.port() != self.node.bind.port() {
            anyhow::bail!(
                "node.bind port {} does not match this node's member address {}",
                self.node.bind.port(),
                me.addr
            );
        }
        if self.cluster.alpha == 0 {
            anyhow::bail!("cluster.alpha must be > 0");
        }
        if self.journal.path.is_empty() {
            anyhow::bail!("journal.path must not be empty");
        }
        if self.liveness.pulse_interval_ms == 0 {
            anyhow::bail!("liveness.pulse_interval_ms must be > 0");
        }
        Ok(())
    }

    /// Member ids in the order peers will also compute them.
    pub fn member_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cluster.members.iter().map(|m| m.id.clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
            [node]
            id = "n1"
            bind = "0.0.0.0:9700"

            [cluster]
            members = [
                { id = "n1", addr = "10.0.0.1:9700" },
                { id = "n2", addr = "10.0.0.2:9700" },
                { id = "n3", addr = "10.0.0.3:9700" },
            ]

            [journal]
            path = "/var/lib/concord/journal"
        "#
        .to_string()
    }

    #[test]
    fn parses_with_defaults() {
        let config: Config = toml::from_str(&base_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cluster.alpha, 50);
        assert_eq!(config.liveness.pulse_interval_ms, 1_000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.member_ids(), vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn rejects_unknown_node_id() {
        let mut config: Config = toml::from_str(&base_toml()).unwrap();
        config.node.id = "nope".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_members() {
        let toml = base_toml().replace("n2", "n1");
        let config: Config = toml::from_str(&toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_port_mismatch() {
        let mut config: Config = toml::from_str(&base_toml()).unwrap();
        config.node.bind = "0.0.0.0:1".parse().unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_alpha() {
        let mut config: Config = toml::from_str(&base_toml()).unwrap();
        config.cluster.alpha = 0;
        assert!(config.validate().is_err());
    }
}
