//! TOML configuration for the skiff daemon.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use skiff_net::PoolConfig;
use skiff_sas::SasCacheConfig;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity and role.
    pub node: NodeSection,
    /// Logical-node → endpoint table for routing.
    pub nodes: BTreeMap<String, String>,
    /// Connection pool tuning.
    pub pool: PoolSection,
    /// Staging container and SAS settings.
    pub sas: SasSection,
    /// Caller allow-lists.
    pub auth: AuthSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// This node's logical name.
    pub name: String,
    /// Role: `"worker"` (default) or `"proxy"`.
    pub role: String,
    /// Address the daemon listens on.
    pub listen_addr: String,
    /// Logical name of the proxy that off-node requests bounce through.
    pub proxy: String,
    /// Cluster name, part of the staging container identity.
    pub cluster: String,
    /// Deployment name, part of the staging container identity.
    pub deployment: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: "node-0".to_string(),
            role: "worker".to_string(),
            listen_addr: "0.0.0.0:4940".to_string(),
            proxy: "proxy".to_string(),
            cluster: "cluster".to_string(),
            deployment: "default".to_string(),
        }
    }
}

/// `[pool]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Seconds between keep-alive pings on cached connections.
    pub keepalive_secs: u64,
    /// Seconds between idle-eviction sweeps.
    pub sweep_secs: u64,
    /// Seconds of inactivity after which a connection is evicted.
    pub idle_ttl_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            keepalive_secs: defaults.keepalive_interval.as_secs(),
            sweep_secs: defaults.sweep_interval.as_secs(),
            idle_ttl_secs: defaults.idle_ttl.as_secs(),
        }
    }
}

/// `[sas]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SasSection {
    /// Minutes of remaining validity below which a policy is rotated.
    pub rotation_minutes: u64,
    /// Minutes an ad-hoc blob token stays valid.
    pub blob_validity_minutes: u64,
    /// Key the in-process blob account signs tokens with.
    pub signing_key: String,
    /// Directory backing the staging containers.
    pub staging_root: PathBuf,
}

impl Default for SasSection {
    fn default() -> Self {
        let defaults = SasCacheConfig::default();
        Self {
            rotation_minutes: defaults.rotation_interval.as_secs() / 60,
            blob_validity_minutes: defaults.blob_validity.as_secs() / 60,
            signing_key: String::new(),
            staging_root: PathBuf::from("/var/lib/skiff/staging"),
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Accounts allowed to submit operations.
    pub cluster_users: HashSet<String>,
    /// Accounts that get every right.
    pub admins: HashSet<String>,
    /// Accounts restricted to read operations.
    pub read_only: HashSet<String>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective connection pool configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            keepalive_interval: Duration::from_secs(self.pool.keepalive_secs),
            sweep_interval: Duration::from_secs(self.pool.sweep_secs),
            idle_ttl: Duration::from_secs(self.pool.idle_ttl_secs),
        }
    }

    /// Effective SAS cache configuration.
    pub fn sas_config(&self) -> SasCacheConfig {
        SasCacheConfig {
            rotation_interval: Duration::from_secs(self.sas.rotation_minutes * 60),
            blob_validity: Duration::from_secs(self.sas.blob_validity_minutes * 60),
        }
    }

    /// Whether this daemon runs the proxy role.
    pub fn is_proxy(&self) -> bool {
        self.node.role == "proxy"
    }
}
