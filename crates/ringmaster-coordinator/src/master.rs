//! The master node: membership, live ring and migration orchestration.
//!
//! [`MasterNode`] keeps the membership set, the current ring and its version
//! behind a single `RwLock`. Rings are never mutated once published: each
//! topology change builds the next ring from a copy, publishes it, and plans
//! the migration by diffing it against the previous one. The write lock is
//! held until every migration call of the change has returned, so readers
//! only ever see complete topologies.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ringmaster_migration::{
    MigrationClient, MigrationCommand, MigrationError, MigrationExecutor, MigrationReport,
    plan_migration,
};
use ringmaster_placement::{Blake3Hash, Collision, HashFunction, HashRing};
use ringmaster_types::ServerNode;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::config::{CollisionPolicy, MasterConfig};
use crate::error::MasterError;

/// A published topology change or a migration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    /// A node joined the ring.
    NodeAdded {
        /// Address of the node.
        address: String,
        /// Ring version that includes it.
        version: u64,
    },
    /// A node left the ring.
    NodeRemoved {
        /// Address of the node.
        address: String,
        /// First ring version without it.
        version: u64,
    },
    /// The ring was rebuilt with a new density.
    Resharded {
        /// New virtual points per node.
        virtual_nodes: u32,
        /// Version of the rebuilt ring.
        version: u64,
    },
    /// A migration call failed and was added to the pending log.
    MigrationFailed {
        /// The command that failed.
        command: MigrationCommand,
        /// Why it failed.
        error: MigrationError,
    },
}

/// Result of a topology operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutcome {
    /// `false` when the call was a no-op (node already present / absent).
    pub applied: bool,
    /// Ring version after the call.
    pub version: u64,
    /// Migrations issued for the change.
    pub report: MigrationReport,
}

impl ChangeOutcome {
    fn unchanged(version: u64) -> Self {
        Self {
            applied: false,
            version,
            report: MigrationReport::empty(version),
        }
    }
}

/// Everything the lock guards, changed as one unit.
struct Topology {
    /// Current members, keyed by address, with the salts they were placed with.
    members: BTreeMap<String, Arc<ServerNode>>,
    /// The published ring.
    ring: Arc<HashRing>,
    /// Bumped on every published ring.
    version: u64,
    /// Migration commands that failed and have not been retried successfully.
    pending: Vec<MigrationCommand>,
}

/// The sharding master.
///
/// Construct once at startup and share the returned `Arc` with whatever
/// serves routing and administration.
pub struct MasterNode {
    topology: RwLock<Topology>,
    executor: MigrationExecutor,
    collision_policy: CollisionPolicy,
    max_salt_attempts: u32,
    /// Broadcast channel for topology events.
    event_tx: broadcast::Sender<TopologyEvent>,
}

impl MasterNode {
    /// Create a master hashing with [`Blake3Hash`].
    pub fn new(
        config: MasterConfig,
        client: Arc<dyn MigrationClient>,
    ) -> Result<Arc<Self>, MasterError> {
        Self::with_hasher(config, client, Arc::new(Blake3Hash))
    }

    /// Create a master with an explicit hash function.
    ///
    /// `config.initial_nodes` are placed on the first ring (version 0)
    /// without any migration.
    pub fn with_hasher(
        config: MasterConfig,
        client: Arc<dyn MigrationClient>,
        hasher: Arc<dyn HashFunction>,
    ) -> Result<Arc<Self>, MasterError> {
        if config.virtual_nodes == 0 {
            return Err(MasterError::InvalidShardCount);
        }

        let (event_tx, _) = broadcast::channel(256);
        let mut master = Self {
            topology: RwLock::new(Topology {
                members: BTreeMap::new(),
                ring: Arc::new(HashRing::with_hasher(config.virtual_nodes, hasher.clone())),
                version: 0,
                pending: Vec::new(),
            }),
            executor: MigrationExecutor::new(client, config.executor),
            collision_policy: config.collision_policy,
            max_salt_attempts: config.max_salt_attempts,
            event_tx,
        };

        let mut ring = HashRing::with_hasher(config.virtual_nodes, hasher);
        let mut members = BTreeMap::new();
        for address in &config.initial_nodes {
            let node = ServerNode::new(address.as_str())?;
            if members.contains_key(node.address()) {
                continue;
            }
            let node = master.place(&mut ring, node)?;
            members.insert(node.address().to_string(), node);
        }

        info!(
            nodes = members.len(),
            virtual_nodes = config.virtual_nodes,
            policy = ?config.collision_policy,
            "master node initialized"
        );

        let topology = master.topology.get_mut();
        topology.members = members;
        topology.ring = Arc::new(ring);

        Ok(Arc::new(master))
    }

    /// Subscribe to topology events.
    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.event_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Topology changes (write lock)
    // -----------------------------------------------------------------------

    /// Add a server to the ring and migrate the ranges it takes over.
    ///
    /// Returns `applied = false` if the address is already a member. The
    /// first member is placed without migration.
    pub async fn add_server(&self, node: ServerNode) -> Result<ChangeOutcome, MasterError> {
        info!(%node, "add server");
        let mut topology = self.topology.write().await;

        if topology.members.contains_key(node.address()) {
            info!(%node, "server already exists");
            return Ok(ChangeOutcome::unchanged(topology.version));
        }

        let old = Arc::clone(&topology.ring);
        let mut next = HashRing::clone(&old);
        let node = self.place(&mut next, node)?;

        let first = topology.members.is_empty();
        let version = topology.version + 1;
        topology
            .members
            .insert(node.address().to_string(), Arc::clone(&node));
        topology.ring = Arc::new(next);
        topology.version = version;

        let _ = self.event_tx.send(TopologyEvent::NodeAdded {
            address: node.address().to_string(),
            version,
        });

        let report = if first {
            debug!(%node, "first server, nothing to migrate");
            MigrationReport::empty(version)
        } else {
            self.migrate(&mut topology, &old, version).await
        };

        Ok(ChangeOutcome {
            applied: true,
            version,
            report,
        })
    }

    /// Remove a server from the ring and migrate its ranges to whoever owns
    /// them now.
    ///
    /// Returns `applied = false` if the address is not a member.
    pub async fn remove_server(&self, node: &ServerNode) -> Result<ChangeOutcome, MasterError> {
        info!(%node, "remove server");
        let mut topology = self.topology.write().await;

        // The stored member carries the salts its points were placed with.
        let Some(member) = topology.members.remove(node.address()) else {
            info!(%node, "server not found");
            return Ok(ChangeOutcome::unchanged(topology.version));
        };

        let old = Arc::clone(&topology.ring);
        let mut next = HashRing::clone(&old);
        next.remove_node(&member);

        let version = topology.version + 1;
        topology.ring = Arc::new(next);
        topology.version = version;

        if topology.members.is_empty() {
            warn!(%node, "last server removed, its data has no destination");
        }

        let _ = self.event_tx.send(TopologyEvent::NodeRemoved {
            address: member.address().to_string(),
            version,
        });

        let report = self.migrate(&mut topology, &old, version).await;
        Ok(ChangeOutcome {
            applied: true,
            version,
            report,
        })
    }

    /// Rebuild the ring from the current members with `virtual_nodes` points
    /// each, and migrate everything that changed owner.
    pub async fn update_shard_count(
        &self,
        virtual_nodes: u32,
    ) -> Result<ChangeOutcome, MasterError> {
        info!(virtual_nodes, "update shard count");
        if virtual_nodes == 0 {
            return Err(MasterError::InvalidShardCount);
        }

        let mut topology = self.topology.write().await;

        let old = Arc::clone(&topology.ring);
        let mut next = HashRing::with_hasher(virtual_nodes, old.hasher());
        let mut members = BTreeMap::new();
        for (address, member) in &topology.members {
            let node = self.place(&mut next, ServerNode::clone(member))?;
            members.insert(address.clone(), node);
        }

        let version = topology.version + 1;
        topology.members = members;
        topology.ring = Arc::new(next);
        topology.version = version;

        let _ = self.event_tx.send(TopologyEvent::Resharded {
            virtual_nodes,
            version,
        });

        let report = self.migrate(&mut topology, &old, version).await;
        Ok(ChangeOutcome {
            applied: true,
            version,
            report,
        })
    }

    /// Re-issue every pending migration against the current ring.
    ///
    /// A pending command's data still sits on its source. Its range is
    /// re-resolved against the published ring: each piece goes from that
    /// source to the piece's current owner, stamped with the current version.
    /// Pieces the source owns again are dropped. Commands that succeed leave
    /// the pending log; the rest stay, as re-resolved.
    pub async fn retry_pending(&self) -> MigrationReport {
        let mut topology = self.topology.write().await;
        let version = topology.version;

        if topology.ring.is_empty() {
            warn!(
                pending = topology.pending.len(),
                "no servers, keeping pending migrations"
            );
            return MigrationReport::empty(version);
        }

        let pending = std::mem::take(&mut topology.pending);
        let commands = reroute(&topology.ring, pending, version);
        info!(commands = commands.len(), version, "retrying pending migrations");

        let report = self.executor.retry(version, commands).await;
        self.record_failures(&mut topology, &report);
        report
    }

    // -----------------------------------------------------------------------
    // Queries (read lock)
    // -----------------------------------------------------------------------

    /// Server responsible for `key`, or `None` with no members.
    pub async fn get_server_for_key(&self, key: &str) -> Option<Arc<ServerNode>> {
        debug!(key, "get server for key");
        let topology = self.topology.read().await;
        topology.ring.lookup_owner(key).cloned()
    }

    /// Snapshot of the current members, ordered by address.
    pub async fn get_nodes(&self) -> Vec<Arc<ServerNode>> {
        self.topology.read().await.members.values().cloned().collect()
    }

    /// Virtual points per node in the current ring.
    pub async fn get_virtual_nodes(&self) -> u32 {
        self.topology.read().await.ring.vnodes_per_node()
    }

    /// The currently published ring.
    pub async fn ring_snapshot(&self) -> Arc<HashRing> {
        Arc::clone(&self.topology.read().await.ring)
    }

    /// Version of the currently published ring.
    pub async fn version(&self) -> u64 {
        self.topology.read().await.version
    }

    /// Migration commands that failed and still await a retry.
    pub async fn pending_migrations(&self) -> Vec<MigrationCommand> {
        self.topology.read().await.pending.clone()
    }

    // -----------------------------------------------------------------------
    // Routing and administrative surface
    // -----------------------------------------------------------------------

    /// Address of the server responsible for `key`.
    pub async fn resolve(&self, key: &str) -> Option<String> {
        self.get_server_for_key(key)
            .await
            .map(|node| node.address().to_string())
    }

    /// Addresses of all members.
    pub async fn list_nodes(&self) -> Vec<String> {
        self.topology.read().await.members.keys().cloned().collect()
    }

    /// Virtual points per node.
    pub async fn virtual_node_count(&self) -> u32 {
        self.get_virtual_nodes().await
    }

    /// Add the server at `address`. `Ok(false)` if it was already a member.
    pub async fn add_node(&self, address: &str) -> Result<bool, MasterError> {
        let outcome = self.add_server(ServerNode::new(address)?).await?;
        Ok(outcome.applied)
    }

    /// Remove the server at `address`. `Ok(false)` if it was not a member.
    pub async fn remove_node(&self, address: &str) -> Result<bool, MasterError> {
        let outcome = self.remove_server(&ServerNode::new(address)?).await?;
        Ok(outcome.applied)
    }

    /// Change the number of virtual points per node.
    pub async fn set_shard_count(&self, virtual_nodes: u32) -> Result<(), MasterError> {
        self.update_shard_count(virtual_nodes).await.map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Plan and dispatch the move from `old` to the published ring.
    async fn migrate(
        &self,
        topology: &mut Topology,
        old: &HashRing,
        version: u64,
    ) -> MigrationReport {
        let plan = plan_migration(old, &topology.ring);
        if plan.is_empty() {
            debug!(version, "topology change needs no migration");
            return MigrationReport::empty(version);
        }

        let report = self.executor.execute(&plan, old, version).await;
        self.record_failures(topology, &report);
        report
    }

    fn record_failures(&self, topology: &mut Topology, report: &MigrationReport) {
        for failed in &report.failed {
            warn!(
                command = %failed.command,
                error = %failed.error,
                "migration left pending"
            );
            topology.pending.push(failed.command.clone());
            let _ = self.event_tx.send(TopologyEvent::MigrationFailed {
                command: failed.command.clone(),
                error: failed.error.clone(),
            });
        }
    }

    /// Put `node` on `ring`, applying the collision policy first.
    fn place(&self, ring: &mut HashRing, mut node: ServerNode) -> Result<Arc<ServerNode>, MasterError> {
        let collisions = ring.collisions(&node);
        if let Some(first) = collisions.first() {
            match self.collision_policy {
                CollisionPolicy::Overwrite => {}
                CollisionPolicy::Reject => return Err(MasterError::Collision(first.clone())),
                CollisionPolicy::Resalt => self.resalt(ring, &mut node)?,
            }
        }

        let node = Arc::new(node);
        ring.add_node(Arc::clone(&node));
        Ok(node)
    }

    /// Assign alternate salts until none of the node's points collide.
    fn resalt(&self, ring: &HashRing, node: &mut ServerNode) -> Result<(), MasterError> {
        let mut attempts: HashMap<u32, u32> = HashMap::new();

        while let Some(Collision {
            index, position, ..
        }) = ring.collisions(node).into_iter().next()
        {
            let attempt = attempts.entry(index).or_insert(0);
            if *attempt >= self.max_salt_attempts {
                return Err(MasterError::SaltExhausted {
                    address: node.address().to_string(),
                    index,
                    attempts: *attempt,
                });
            }

            node.set_alternate_salt(index, *attempt);
            info!(
                %node,
                index,
                position,
                salt = %node.salt(index),
                "resalted colliding virtual point"
            );
            *attempt += 1;
        }

        Ok(())
    }
}

/// Point pending commands at the current owners of their ranges.
fn reroute(ring: &HashRing, pending: Vec<MigrationCommand>, version: u64) -> Vec<MigrationCommand> {
    let mut commands = Vec::with_capacity(pending.len());

    for stale in pending {
        for (range, owner) in ring.owners_in(stale.range) {
            if owner == &stale.source {
                debug!(%range, source = %stale.source, "source owns pending range again, dropping");
                continue;
            }
            if owner != &stale.target {
                debug!(%range, from = %stale.target, to = %owner, "pending range changed target");
            }
            commands.push(MigrationCommand {
                target: Arc::clone(owner),
                range,
                source: Arc::clone(&stale.source),
                version,
            });
        }
    }

    commands.sort();
    commands.dedup();
    commands
}

impl std::fmt::Debug for MasterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterNode")
            .field("collision_policy", &self.collision_policy)
            .field("max_salt_attempts", &self.max_salt_attempts)
            .finish_non_exhaustive()
    }
}
