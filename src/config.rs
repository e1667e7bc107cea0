//! WolfShard Configuration
//!
//! This module provides configuration structures for the replication
//! coordinator and the in-memory simulated cluster.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::replication::WriteConsistencyLevel;

/// Main WolfShard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfShardConfig {
    /// Replication behaviour
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Simulated cluster used by `wolfshard simulate`
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Replication settings shared by every operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Consistency used when a request asks for the default
    #[serde(default = "default_write_consistency")]
    pub write_consistency: WriteConsistencyLevel,

    /// Send operations to replica copies at all
    #[serde(default = "default_true")]
    pub execute_on_replicas: bool,

    /// Check active copies before touching the primary
    #[serde(default = "default_true")]
    pub check_write_consistency: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Simulated cluster layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Index the simulated writes go to
    #[serde(default = "default_index")]
    pub index: String,

    /// Number of shards in the index
    #[serde(default = "default_shards")]
    pub shards: u32,

    /// Number of nodes, named node-1 .. node-N
    #[serde(default = "default_nodes")]
    pub nodes: usize,

    /// Replica copies per shard
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Injected faults
    #[serde(default)]
    pub faults: Vec<FaultConfig>,
}

/// A fault injected on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Node the fault applies to
    pub node: String,

    /// What goes wrong
    pub kind: FaultKind,

    /// Chance of the fault firing per replica operation (0.0 - 1.0)
    #[serde(default = "default_probability")]
    pub probability: f64,
}

/// Kinds of injectable replica faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The replica never answers in time
    Timeout,
    /// The connection to the node drops
    Disconnect,
    /// The replica already holds a newer version
    VersionConflict,
    /// The copy was closed underneath the operation
    ShardClosed,
    /// The replica fails, and the master rejects the primary's fail request
    DemoteOnFail,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Timeout => write!(f, "timeout"),
            FaultKind::Disconnect => write!(f, "disconnect"),
            FaultKind::VersionConflict => write!(f, "version_conflict"),
            FaultKind::ShardClosed => write!(f, "shard_closed"),
            FaultKind::DemoteOnFail => write!(f, "demote_on_fail"),
        }
    }
}

// Default value functions
fn default_write_consistency() -> WriteConsistencyLevel {
    WriteConsistencyLevel::Quorum
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_index() -> String {
    "docs".to_string()
}

fn default_shards() -> u32 {
    1
}

fn default_nodes() -> usize {
    3
}

fn default_replicas() -> usize {
    2
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_probability() -> f64 {
    1.0
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            write_consistency: default_write_consistency(),
            execute_on_replicas: true,
            check_write_consistency: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            index: default_index(),
            shards: default_shards(),
            nodes: default_nodes(),
            replicas: default_replicas(),
            timeout_ms: default_timeout_ms(),
            faults: Vec::new(),
        }
    }
}

impl ReplicationSettings {
    /// Level applied to requests that ask for `default`
    pub fn default_consistency(&self) -> WriteConsistencyLevel {
        self.write_consistency
            .resolve(WriteConsistencyLevel::Quorum)
    }
}

impl SimulationConfig {
    /// Names of the simulated nodes
    pub fn node_ids(&self) -> Vec<String> {
        (1..=self.nodes).map(|i| format!("node-{}", i)).collect()
    }

    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Faults configured for `node`
    pub fn faults_for<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a FaultConfig> + 'a {
        self.faults.iter().filter(move |f| f.node == node)
    }
}

impl WolfShardConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfShardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.replication.write_consistency == WriteConsistencyLevel::Default {
            return Err(crate::Error::Config(
                "replication.write_consistency must be one of one, quorum, all".into(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "compact") {
            return Err(crate::Error::Config(format!(
                "logging.format must be pretty or compact, got [{}]",
                self.logging.format
            )));
        }

        let sim = &self.simulation;
        if sim.index.is_empty() {
            return Err(crate::Error::Config("simulation.index cannot be empty".into()));
        }

        if sim.shards == 0 {
            return Err(crate::Error::Config("simulation.shards must be at least 1".into()));
        }

        if sim.nodes == 0 {
            return Err(crate::Error::Config("simulation.nodes must be at least 1".into()));
        }

        if sim.replicas + 1 > sim.nodes {
            return Err(crate::Error::Config(format!(
                "simulation.replicas [{}] needs at least {} nodes, have {}",
                sim.replicas,
                sim.replicas + 1,
                sim.nodes
            )));
        }

        let nodes = sim.node_ids();
        for fault in &sim.faults {
            if !nodes.contains(&fault.node) {
                return Err(crate::Error::Config(format!(
                    "fault on unknown node [{}]",
                    fault.node
                )));
            }
            if !(0.0..=1.0).contains(&fault.probability) {
                return Err(crate::Error::Config(format!(
                    "fault probability for [{}] must be between 0.0 and 1.0",
                    fault.node
                )));
            }
        }

        Ok(())
    }
}
