//! Migration executor: issues one remote instruction per planned range.
//!
//! The source of each range is resolved against the ring the plan was
//! computed from, i.e. the node that holds the data right now. Calls for
//! different ranges are independent and run concurrently up to
//! [`ExecutorConfig::max_concurrent`]. [`MigrationExecutor::execute`] returns
//! only once every call has finished, failed or timed out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ringmaster_placement::HashRing;
use ringmaster_types::{HashRange, ServerNode};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::MigrationError;
use crate::planner::MigrationPlan;

/// One instruction: move `range` from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MigrationCommand {
    /// Node that receives the data.
    pub target: Arc<ServerNode>,
    /// Inclusive range of positions to move.
    pub range: HashRange,
    /// Node currently holding the data.
    pub source: Arc<ServerNode>,
    /// Version of the ring the move was resolved against.
    pub version: u64,
}

impl fmt::Display for MigrationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} (v{})",
            self.range, self.source, self.target, self.version
        )
    }
}

/// Abstracts the remote side of a migration so that tests can mock it.
///
/// Implementations own the transport and any retry or timeout policy of
/// their own.
#[async_trait::async_trait]
pub trait MigrationClient: Send + Sync {
    /// Instruct `command.source` to hand `command.range` to `command.target`.
    async fn migrate_range(&self, command: &MigrationCommand) -> Result<(), MigrationError>;
}

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum calls in flight at once.
    pub max_concurrent: usize,
    /// Per-call limit. `None` waits for the client indefinitely.
    pub call_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            call_timeout: None,
        }
    }
}

/// A command that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMigration {
    /// The command as issued.
    pub command: MigrationCommand,
    /// Why it failed.
    pub error: MigrationError,
}

/// Outcome of one dispatch round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version of the ring the commands were resolved against. Every
    /// command in the report carries the same version.
    pub version: u64,
    /// Commands the client acknowledged.
    pub completed: Vec<MigrationCommand>,
    /// Commands that failed, timed out or whose task died.
    pub failed: Vec<FailedMigration>,
}

impl MigrationReport {
    /// Empty report for `version`.
    pub fn empty(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Whether every issued command completed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of commands issued.
    pub fn dispatched(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

/// Dispatches migration plans through a [`MigrationClient`].
pub struct MigrationExecutor {
    client: Arc<dyn MigrationClient>,
    config: ExecutorConfig,
}

impl MigrationExecutor {
    /// Create a new executor.
    pub fn new(client: Arc<dyn MigrationClient>, config: ExecutorConfig) -> Self {
        Self { client, config }
    }

    /// The executor's tuning.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Resolve the source of every planned range against `old`.
    ///
    /// Ranges without a source (only possible with an empty `old`) are
    /// skipped.
    pub fn commands(plan: &MigrationPlan, old: &HashRing, version: u64) -> Vec<MigrationCommand> {
        let mut commands = Vec::with_capacity(plan.range_count());
        for (target, ranges) in plan.iter() {
            for range in ranges {
                match old.lookup_owner_of_hash(range.start()) {
                    Some(source) => commands.push(MigrationCommand {
                        target: Arc::clone(target),
                        range: *range,
                        source: Arc::clone(source),
                        version,
                    }),
                    None => warn!(%target, %range, "no previous owner, skipping range"),
                }
            }
        }
        commands
    }

    /// Issue one migration call per range of `plan`, sourcing each range
    /// from its owner in `old`.
    #[tracing::instrument(skip(self, plan, old), fields(ranges = plan.range_count()))]
    pub async fn execute(&self, plan: &MigrationPlan, old: &HashRing, version: u64) -> MigrationReport {
        let commands = Self::commands(plan, old, version);
        self.dispatch(version, commands).await
    }

    /// Dispatch commands that were re-resolved after an earlier failure.
    /// The caller stamps them with `version`.
    #[tracing::instrument(skip(self, commands), fields(commands = commands.len()))]
    pub async fn retry(&self, version: u64, commands: Vec<MigrationCommand>) -> MigrationReport {
        self.dispatch(version, commands).await
    }

    async fn dispatch(&self, version: u64, commands: Vec<MigrationCommand>) -> MigrationReport {
        let mut report = MigrationReport::empty(version);
        if commands.is_empty() {
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::with_capacity(commands.len());

        for command in commands {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.config.call_timeout;
            let issued = command.clone();

            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                debug!(command = %issued, "issuing migration");
                issue(client.as_ref(), &issued, timeout).await
            });
            in_flight.insert(handle.id(), command);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (e.id(), Err(MigrationError::Task(e.to_string()))),
            };
            let Some(command) = in_flight.remove(&id) else {
                error!(task = %id, "finished migration task is not tracked");
                continue;
            };

            match outcome {
                Ok(()) => {
                    debug!(%command, "migration completed");
                    report.completed.push(command);
                }
                Err(error) => {
                    warn!(%command, %error, "migration failed");
                    report.failed.push(FailedMigration { command, error });
                }
            }
        }

        report.completed.sort();
        report.failed.sort_by(|a, b| a.command.cmp(&b.command));

        info!(
            version,
            completed = report.completed.len(),
            failed = report.failed.len(),
            "migration round finished"
        );
        report
    }
}

async fn issue(
    client: &dyn MigrationClient,
    command: &MigrationCommand,
    timeout: Option<Duration>,
) -> Result<(), MigrationError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, client.migrate_range(command)).await {
            Ok(result) => result,
            Err(_) => Err(MigrationError::Timeout(limit)),
        },
        None => client.migrate_range(command).await,
    }
}
