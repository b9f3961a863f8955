//! Sharding master coordination.
//!
//! This crate provides:
//!
//! - [`MasterNode`]: owns the membership set and the live ring, serializes
//!   topology changes and their migrations behind one write lock, and serves
//!   routing queries under the read lock.
//! - [`MasterConfig`] / [`CollisionPolicy`]: construction-time settings.
//! - [`TopologyEvent`]: broadcast for every published change.

mod config;
mod error;
mod master;


pub use config::{CollisionPolicy, MasterConfig};
pub use error::MasterError;
pub use master::{ChangeOutcome, MasterNode, TopologyEvent};
