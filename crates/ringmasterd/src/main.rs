//! `ringmasterd`: inspect and rehearse a Ringmaster topology.
//!
//! Builds a master node from the config file and answers routing and planning
//! questions against it. Migrations go to a dry-run client that prints the
//! commands a real deployment would send.
//!
//! # Usage
//!
//! ```text
//! ringmasterd status                          # members and ring shares
//! ringmasterd -c ringmaster.toml route user:42
//! ringmasterd plan --add 10.0.0.4:8000        # migrations for a new node
//! ringmasterd plan --remove 10.0.0.1:8000 --shards 64 --json
//! ```

mod client;
mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ringmaster_coordinator::{ChangeOutcome, MasterNode};
use ringmaster_migration::MigrationCommand;
use ringmaster_types::ServerNode;
use serde::Serialize;
use tracing::info;

use client::DryRunClient;
use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "ringmasterd",
    version,
    about = "Consistent-hashing sharding master"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "RINGMASTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show members, ring density and each node's share of the ring.
    Status,

    /// Print the node responsible for a key.
    Route {
        /// Key to route.
        key: String,
    },

    /// Apply topology changes against a dry-run client and print the
    /// migrations they require.
    ///
    /// Additions are applied first, then removals, then the shard count.
    Plan {
        /// Node address to add. Can be given multiple times.
        #[arg(long)]
        add: Vec<String>,

        /// Node address to remove. Can be given multiple times.
        #[arg(long)]
        remove: Vec<String>,

        /// New number of virtual points per node.
        #[arg(long)]
        shards: Option<u32>,

        /// Print the commands as JSON.
        #[arg(long)]
        json: bool,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    telemetry::init(&config.log.level);

    let client = Arc::new(DryRunClient::default());
    let master = MasterNode::new(config.master_config(), client.clone())
        .context("failed to build initial ring")?;

    match cli.command {
        Commands::Status => cmd_status(&master).await,
        Commands::Route { key } => cmd_route(&master, &key).await,
        Commands::Plan {
            add,
            remove,
            shards,
            json,
        } => cmd_plan(&master, &client, add, remove, shards, json).await,
    }
}

// -----------------------------------------------------------------------
// ringmasterd status
// -----------------------------------------------------------------------

async fn cmd_status(master: &MasterNode) -> Result<()> {
    let ring = master.ring_snapshot().await;
    let nodes = master.get_nodes().await;

    println!("Ringmaster status");
    println!("  Ring version:    {}", master.version().await);
    println!("  Nodes:           {}", nodes.len());
    println!("  Virtual nodes:   {}", ring.vnodes_per_node());
    println!("  Ring points:     {}", ring.len());

    if nodes.is_empty() {
        println!("\n  (no nodes configured)");
        return Ok(());
    }

    println!();
    println!("  {:<32} {:>7} {:>8}", "NODE", "RANGES", "SHARE");
    for node in &nodes {
        let ranges = ring.ranges_owned_by(node);
        let covered: u64 = ranges.iter().map(|r| r.len()).sum();
        let share = covered as f64 / (1u64 << 32) as f64 * 100.0;
        println!("  {:<32} {:>7} {:>7.2}%", node.address(), ranges.len(), share);
    }

    Ok(())
}

// -----------------------------------------------------------------------
// ringmasterd route
// -----------------------------------------------------------------------

async fn cmd_route(master: &MasterNode, key: &str) -> Result<()> {
    match master.resolve(key).await {
        Some(address) => println!("{address}"),
        None => anyhow::bail!("no nodes configured, cannot route {key:?}"),
    }
    Ok(())
}

// -----------------------------------------------------------------------
// ringmasterd plan
// -----------------------------------------------------------------------

/// One migration command as printed by `plan --json`.
#[derive(Debug, Serialize)]
struct CommandView {
    version: u64,
    source: String,
    target: String,
    start: i32,
    end: i32,
}

impl From<&MigrationCommand> for CommandView {
    fn from(command: &MigrationCommand) -> Self {
        Self {
            version: command.version,
            source: command.source.address().to_string(),
            target: command.target.address().to_string(),
            start: command.range.start(),
            end: command.range.end(),
        }
    }
}

/// One topology change and the migrations it required.
#[derive(Debug, Serialize)]
struct ChangeView {
    change: String,
    applied: bool,
    version: u64,
    commands: Vec<CommandView>,
}

impl ChangeView {
    fn new(change: String, outcome: &ChangeOutcome, mut issued: Vec<MigrationCommand>) -> Self {
        issued.sort();
        Self {
            change,
            applied: outcome.applied,
            version: outcome.version,
            commands: issued.iter().map(CommandView::from).collect(),
        }
    }
}

async fn cmd_plan(
    master: &MasterNode,
    client: &DryRunClient,
    add: Vec<String>,
    remove: Vec<String>,
    shards: Option<u32>,
    json: bool,
) -> Result<()> {
    let mut changes = Vec::new();

    for address in add {
        let node = ServerNode::new(address.as_str())?;
        let outcome = master
            .add_server(node)
            .await
            .with_context(|| format!("failed to add {address}"))?;
        changes.push(ChangeView::new(format!("add {address}"), &outcome, client.drain()));
    }

    for address in remove {
        let node = ServerNode::new(address.as_str())?;
        let outcome = master
            .remove_server(&node)
            .await
            .with_context(|| format!("failed to remove {address}"))?;
        changes.push(ChangeView::new(format!("remove {address}"), &outcome, client.drain()));
    }

    if let Some(virtual_nodes) = shards {
        let outcome = master
            .update_shard_count(virtual_nodes)
            .await
            .with_context(|| format!("failed to set shard count to {virtual_nodes}"))?;
        changes.push(ChangeView::new(
            format!("shards {virtual_nodes}"),
            &outcome,
            client.drain(),
        ));
    }

    info!(changes = changes.len(), "plan complete");

    if json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
        return Ok(());
    }

    if changes.is_empty() {
        println!("no changes requested");
        return Ok(());
    }

    for change in &changes {
        if !change.applied {
            println!("{} (v{}): no-op", change.change, change.version);
            continue;
        }
        println!(
            "{} (v{}): {} migration(s)",
            change.change,
            change.version,
            change.commands.len()
        );
        for command in &change.commands {
            println!(
                "  [{}, {}] {} -> {}",
                command.start, command.end, command.source, command.target
            );
        }
    }

    Ok(())
}
