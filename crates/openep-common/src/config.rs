//! Configuration types for OpenEndpoint
//!
//! Typed configuration per subsystem with the documented defaults. Values
//! can be layered from an optional file plus environment variables prefixed
//! `OPENEP_` (double underscore as the section separator, e.g.
//! `OPENEP_SERVER__PORT=9100`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server listener configuration
    pub server: ServerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Static credential configuration
    pub auth: AuthConfig,
    /// Cluster configuration
    pub cluster: ClusterConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from an optional file path plus `OPENEP_`
    /// environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder
            .add_source(config::Environment::with_prefix("OPENEP").separator("__"))
            .build()?
            .try_deserialize()
    }
}

/// HTTP listener configuration (consumed by the external adapter)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Read timeout in seconds
    pub read_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            read_timeout: 60,
        }
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory; buckets live under `<data_dir>/buckets`,
    /// metadata under `<data_dir>/metadata`
    pub data_dir: PathBuf,
    /// Maximum object size in bytes (default: 5 TB)
    pub max_object_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/openendpoint"),
            max_object_size: 5 * 1024 * 1024 * 1024 * 1024,
        }
    }
}

/// Static credential configuration (consumed by the external auth adapter)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Access key ID
    pub access_key: String,
    /// Secret access key
    pub secret_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_key: "openep".to_string(),
            secret_key: String::new(),
        }
    }
}

/// Cluster configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Whether clustering is enabled at all
    pub enabled: bool,
    /// Stable node identifier; generated when empty
    pub node_id: String,
    /// Human-readable node name
    pub node_name: String,
    /// Gossip bind address
    pub bind_addr: String,
    /// Gossip bind port
    pub bind_port: u16,
    /// Seed peers to contact on startup (`host:port`)
    pub seeds: Vec<String>,
    /// Replication factor N for replicated writes
    pub replication_factor: usize,
    /// Virtual points contributed to the ring by each node
    pub virtual_nodes: usize,
    /// Push-pull state exchange interval in seconds
    pub push_pull_interval: u64,
    /// Health / metadata tick interval in seconds
    pub probe_interval: u64,
    /// Seconds without contact before a member turns suspect
    pub suspicion_timeout: u64,
    /// Seconds without contact before a suspect member is declared dead
    pub death_timeout: u64,
    /// Rebalancer configuration
    pub rebalance: RebalanceConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: String::new(),
            node_name: "openep-node".to_string(),
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 7946,
            seeds: Vec::new(),
            replication_factor: 3,
            virtual_nodes: 150,
            push_pull_interval: 30,
            probe_interval: 10,
            suspicion_timeout: 30,
            death_timeout: 120,
            rebalance: RebalanceConfig::default(),
        }
    }
}

/// Rebalancer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Checker interval in seconds
    pub check_interval: u64,
    /// Imbalance threshold as a fraction of the mean load (0.10 = 10%)
    pub imbalance_threshold: f64,
    /// Maximum concurrent shard moves
    pub max_concurrent_moves: usize,
    /// Bytes-per-second cap for move traffic (0 = unlimited)
    pub throttle_bytes_per_sec: u64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            check_interval: 300,
            imbalance_threshold: 0.10,
            max_concurrent_moves: 5,
            throttle_bytes_per_sec: 0,
        }
    }
}

/// Metrics configuration (consumed by the external instrumentation adapter)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is enabled
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.cluster.replication_factor, 3);
        assert_eq!(config.cluster.virtual_nodes, 150);
        assert_eq!(config.cluster.rebalance.check_interval, 300);
        assert!((config.cluster.rebalance.imbalance_threshold - 0.10).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
