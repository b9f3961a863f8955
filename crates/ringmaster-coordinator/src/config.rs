//! Coordinator configuration.

use ringmaster_migration::ExecutorConfig;
use serde::Deserialize;

/// What to do when a new virtual point lands on a taken position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Overwrite the existing point and log a warning.
    Overwrite,
    /// Refuse the change.
    Reject,
    /// Give the colliding index an alternate salt (`salty0`, `salty1`, ...).
    #[default]
    Resalt,
}

/// Settings for a [`MasterNode`](crate::MasterNode).
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Virtual points per node for the initial ring.
    pub virtual_nodes: u32,
    /// Node addresses placed on the initial ring, without migration.
    pub initial_nodes: Vec<String>,
    /// Collision handling.
    pub collision_policy: CollisionPolicy,
    /// Alternate salts tried per index under [`CollisionPolicy::Resalt`].
    pub max_salt_attempts: u32,
    /// Migration dispatch tuning.
    pub executor: ExecutorConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            virtual_nodes: 1,
            initial_nodes: Vec::new(),
            collision_policy: CollisionPolicy::default(),
            max_salt_attempts: 64,
            executor: ExecutorConfig::default(),
        }
    }
}
