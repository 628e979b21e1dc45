//! Client configuration.
//!
//! Every field has a default, so a config file only needs to list the
//! seeds. Durations are plain milliseconds to keep TOML files readable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::ClusterError;

/// Settings for a [`ClusterClient`](crate::ClusterClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Bootstrap nodes as `host:port` or `password@host:port`.
    pub seeds: Vec<String>,
    /// Topology is fetched at most once per this interval.
    pub min_discovery_interval_ms: u64,
    /// Pause before trying the next seed after one fails.
    pub seed_retry_delay_ms: u64,
    /// How many times a failed operation is retried after a refresh.
    pub max_retries: u32,
    pub connect_timeout_ms: u64,
    pub pool: PoolConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            min_discovery_interval_ms: 3000,
            seed_retry_delay_ms: 100,
            max_retries: 1,
            connect_timeout_ms: 1000,
            pool: PoolConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Creates a config with default settings for the given seeds.
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Checks the settings and parses the seed list.
    pub fn validate(&self) -> Result<Vec<Endpoint>, ClusterError> {
        if self.seeds.is_empty() {
            return Err(ClusterError::Configuration(
                "at least one seed is required".into(),
            ));
        }
        if self.pool.max_size == 0 {
            return Err(ClusterError::Configuration(
                "pool.max_size must be at least 1".into(),
            ));
        }
        self.seeds.iter().map(|s| s.parse()).collect()
    }

    pub fn min_discovery_interval(&self) -> Duration {
        Duration::from_millis(self.min_discovery_interval_ms)
    }

    pub fn seed_retry_delay(&self) -> Duration {
        Duration::from_millis(self.seed_retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Per-node connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum live connections per node.
    pub max_size: usize,
    /// How long `acquire` waits for a free connection.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            acquire_timeout_ms: 2000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}
