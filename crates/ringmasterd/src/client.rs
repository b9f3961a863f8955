//! Migration client that only records what it would have done.

use std::sync::Mutex;

use ringmaster_migration::{MigrationClient, MigrationCommand, MigrationError};
use tracing::debug;

/// Accepts every command and keeps it for printing.
#[derive(Debug, Default)]
pub struct DryRunClient {
    issued: Mutex<Vec<MigrationCommand>>,
}

impl DryRunClient {
    /// Take the commands recorded so far, in issue order per round.
    pub fn drain(&self) -> Vec<MigrationCommand> {
        match self.issued.lock() {
            Ok(mut issued) => std::mem::take(&mut *issued),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait::async_trait]
impl MigrationClient for DryRunClient {
    async fn migrate_range(&self, command: &MigrationCommand) -> Result<(), MigrationError> {
        debug!(%command, "dry run");
        self.issued
            .lock()
            .map_err(|e| MigrationError::Transport(e.to_string()))?
            .push(command.clone());
        Ok(())
    }
}
