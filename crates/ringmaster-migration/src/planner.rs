//! Migration planner: diffs two ring versions into per-target range lists.

use std::collections::BTreeMap;
use std::sync::Arc;

use ringmaster_placement::HashRing;
use ringmaster_types::{HashRange, ServerNode};
use tracing::{debug, info};

/// Ranges each node must receive, keyed by target node.
///
/// Nodes whose footprint did not change are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    entries: BTreeMap<Arc<ServerNode>, Vec<HashRange>>,
}

impl MigrationPlan {
    /// Append `range` to the ranges `target` must receive.
    pub fn push(&mut self, target: Arc<ServerNode>, range: HashRange) {
        self.entries.entry(target).or_default().push(range);
    }

    /// Ranges planned for `target`, if any.
    pub fn get(&self, target: &ServerNode) -> Option<&[HashRange]> {
        self.entries.get(target).map(Vec::as_slice)
    }

    /// Iterate over `(target, ranges)` in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<ServerNode>, &[HashRange])> + '_ {
        self.entries
            .iter()
            .map(|(target, ranges)| (target, ranges.as_slice()))
    }

    /// Nodes that receive data.
    pub fn targets(&self) -> impl Iterator<Item = &Arc<ServerNode>> + '_ {
        self.entries.keys()
    }

    /// Whether nothing has to move.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of nodes that receive data.
    pub fn target_count(&self) -> usize {
        self.entries.len()
    }

    /// Total number of planned ranges.
    pub fn range_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Compute which ranges must move when the ring changes from `old` to `new`.
///
/// For every node of `new`, its desired ranges are what it owns in `new`
/// (the whole hash space if it is the only node). Each desired range is cut
/// where ownership changed hands in `old`; a piece is planned for the node
/// when its previous owner, looked up from the piece's start, is someone else.
/// An empty `old` ring yields an empty plan since nobody holds data yet.
pub fn plan_migration(old: &HashRing, new: &HashRing) -> MigrationPlan {
    let mut plan = MigrationPlan::default();

    if old.is_empty() {
        debug!("previous ring is empty, nothing to migrate");
        return plan;
    }

    let targets = new.node_set();
    let sole_owner = targets.len() == 1;

    for node in &targets {
        let desired = if sole_owner {
            vec![HashRange::FULL]
        } else {
            new.ranges_owned_by(node)
        };
        debug!(%node, ranges = ?desired, "desired ranges");

        for range in desired {
            for (piece, previous) in old.owners_in(range) {
                if previous != node {
                    debug!(%node, %piece, from = %previous, "range changes owner");
                    plan.push(Arc::clone(node), piece);
                }
            }
        }
    }

    info!(
        targets = plan.target_count(),
        ranges = plan.range_count(),
        "computed migration plan"
    );
    plan
}
