//! TOML configuration for the Ringmaster front end.
//!
//! Every section is optional; missing keys take the defaults of
//! [`MasterConfig`] and [`ExecutorConfig`].

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use ringmaster_coordinator::{CollisionPolicy, MasterConfig};
use ringmaster_migration::ExecutorConfig;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Ring and membership.
    pub master: MasterSection,
    /// Migration dispatch tuning.
    pub migration: MigrationSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[master]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MasterSection {
    /// Virtual points per node.
    pub virtual_nodes: u32,
    /// Node addresses placed on the initial ring.
    pub initial_nodes: Vec<String>,
    /// `"resalt"` (default), `"reject"` or `"overwrite"`.
    pub collision_policy: CollisionPolicy,
    /// Alternate salts tried per colliding point.
    pub max_salt_attempts: u32,
}

impl Default for MasterSection {
    fn default() -> Self {
        let defaults = MasterConfig::default();
        Self {
            virtual_nodes: defaults.virtual_nodes,
            initial_nodes: defaults.initial_nodes,
            collision_policy: defaults.collision_policy,
            max_salt_attempts: defaults.max_salt_attempts,
        }
    }
}

/// `[migration]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MigrationSection {
    /// Maximum migration calls in flight.
    pub max_concurrent: usize,
    /// Per-call timeout in milliseconds. 0 disables it.
    pub call_timeout_ms: u64,
}

impl Default for MigrationSection {
    fn default() -> Self {
        Self {
            max_concurrent: ExecutorConfig::default().max_concurrent,
            call_timeout_ms: 0,
        }
    }
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
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)
                    .with_context(|| format!("failed to parse {}", p.display()))?;
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

    /// Effective per-call migration timeout.
    pub fn call_timeout(&self) -> Option<Duration> {
        match self.migration.call_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Settings for the master node.
    pub fn master_config(&self) -> MasterConfig {
        MasterConfig {
            virtual_nodes: self.master.virtual_nodes,
            initial_nodes: self.master.initial_nodes.clone(),
            collision_policy: self.master.collision_policy,
            max_salt_attempts: self.master.max_salt_attempts,
            executor: ExecutorConfig {
                max_concurrent: self.migration.max_concurrent,
                call_timeout: self.call_timeout(),
            },
        }
    }
}
