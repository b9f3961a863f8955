//! Error types for the coordinator.

use ringmaster_placement::Collision;
use ringmaster_types::TypesError;

/// Errors produced by topology operations.
///
/// Migration failures are not errors here: they are reported in the
/// operation's [`MigrationReport`](ringmaster_migration::MigrationReport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MasterError {
    /// Malformed node address or range.
    #[error(transparent)]
    InvalidInput(#[from] TypesError),

    /// A ring needs at least one point per node.
    #[error("shard count must be at least 1")]
    InvalidShardCount,

    /// A virtual point collided and the policy forbids overwriting.
    #[error("virtual point collision: {0}")]
    Collision(Collision),

    /// No alternate salt freed the position.
    #[error("no free salt for point {index} of {address} after {attempts} attempts")]
    SaltExhausted {
        /// Node being placed.
        address: String,
        /// Virtual-point index that kept colliding.
        index: u32,
        /// Salts tried.
        attempts: u32,
    },
}
