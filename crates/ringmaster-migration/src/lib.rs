//! Migration planning and dispatch for Ringmaster.
//!
//! This crate provides:
//!
//! - [`plan_migration`]: diffs two ring versions into a [`MigrationPlan`],
//!   the ranges each node must receive.
//! - [`MigrationExecutor`]: turns a plan into [`MigrationCommand`]s and
//!   issues them through a [`MigrationClient`], collecting a
//!   [`MigrationReport`].

pub mod error;
pub mod executor;
pub mod planner;

pub use error::MigrationError;
pub use executor::{
    ExecutorConfig, FailedMigration, MigrationClient, MigrationCommand, MigrationExecutor,
    MigrationReport,
};
pub use planner::{MigrationPlan, plan_migration};
