//! Error types for migration dispatch.

use std::time::Duration;

/// Errors reported for a single migration call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    /// The call could not reach the source node.
    #[error("transport error: {0}")]
    Transport(String),

    /// The source node refused the instruction.
    #[error("node {node} rejected migration: {reason}")]
    Rejected {
        /// Node that refused.
        node: String,
        /// Reason given by the node.
        reason: String,
    },

    /// The call did not finish within the configured limit.
    #[error("migration call timed out after {0:?}")]
    Timeout(Duration),

    /// The task running the call panicked or was cancelled.
    #[error("migration task failed: {0}")]
    Task(String),
}
