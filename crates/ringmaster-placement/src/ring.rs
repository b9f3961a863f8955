//! Consistent hashing ring implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use ringmaster_types::{HashRange, Position, ServerNode};
use tracing::{debug, warn};

use crate::hash::{Blake3Hash, HashFunction};

/// A virtual point whose position is already taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    /// Address of the node being placed.
    pub node: String,
    /// Virtual-point index that collided.
    pub index: u32,
    /// The contested ring position.
    pub position: Position,
    /// Address of the node already holding the position.
    pub holder: String,
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "point {} of {} lands on {} held by {}",
            self.index, self.node, self.position, self.holder
        )
    }
}

/// Consistent hashing ring mapping positions to storage nodes.
///
/// Every node gets `vnodes_per_node` points on the `i32` ring. A key belongs
/// to the first point at or after its hash, wrapping to the smallest point.
#[derive(Clone)]
pub struct HashRing {
    /// Virtual point positions: ring position -> owning node.
    points: BTreeMap<Position, Arc<ServerNode>>,
    /// Points placed for every node.
    vnodes_per_node: u32,
    /// Shared between clones; never changes for a ring.
    hasher: Arc<dyn HashFunction>,
}

impl HashRing {
    /// Create an empty ring using [`Blake3Hash`].
    pub fn new(vnodes_per_node: u32) -> Self {
        Self::with_hasher(vnodes_per_node, Arc::new(Blake3Hash))
    }

    /// Create an empty ring with an explicit hash function.
    pub fn with_hasher(vnodes_per_node: u32, hasher: Arc<dyn HashFunction>) -> Self {
        Self {
            points: BTreeMap::new(),
            vnodes_per_node,
            hasher,
        }
    }

    /// Build a ring holding `nodes`, added in iteration order.
    pub fn build<I>(nodes: I, vnodes_per_node: u32, hasher: Arc<dyn HashFunction>) -> Self
    where
        I: IntoIterator<Item = Arc<ServerNode>>,
    {
        let mut ring = Self::with_hasher(vnodes_per_node, hasher);
        for node in nodes {
            ring.add_node(node);
        }
        ring
    }

    /// The hash function this ring places points and keys with.
    pub fn hasher(&self) -> Arc<dyn HashFunction> {
        Arc::clone(&self.hasher)
    }

    /// Position of virtual point `index` of `node`.
    pub fn position_of(&self, node: &ServerNode, index: u32) -> Position {
        self.hasher.hash(&node.point_key(index))
    }

    /// Report every virtual point of `node` that would land on a taken
    /// position, without modifying the ring.
    ///
    /// A position counts as taken when another node holds it, or when an
    /// earlier index of `node` itself hashes to it.
    pub fn collisions(&self, node: &ServerNode) -> Vec<Collision> {
        let mut own = BTreeSet::new();
        let mut found = Vec::new();

        for index in 0..self.vnodes_per_node {
            let position = self.position_of(node, index);
            let holder = match self.points.get(&position) {
                Some(holder) if holder.as_ref() != node => Some(holder.address()),
                _ if !own.insert(position) => Some(node.address()),
                _ => None,
            };
            if let Some(holder) = holder {
                found.push(Collision {
                    node: node.address().to_string(),
                    index,
                    position,
                    holder: holder.to_string(),
                });
            }
        }

        found
    }

    /// Add a node's virtual points to the ring.
    ///
    /// A point landing on a taken position overwrites it. Overwrites are
    /// logged and returned so callers can react.
    pub fn add_node(&mut self, node: Arc<ServerNode>) -> Vec<Collision> {
        let collisions = self.collisions(&node);
        for c in &collisions {
            warn!(
                node = %c.node,
                index = c.index,
                position = c.position,
                holder = %c.holder,
                "virtual point collision, overwriting"
            );
        }

        for index in 0..self.vnodes_per_node {
            let position = self.position_of(&node, index);
            self.points.insert(position, Arc::clone(&node));
        }

        debug!(%node, vnodes = self.vnodes_per_node, "added node to ring");
        collisions
    }

    /// Remove a node's virtual points. Returns how many points were removed.
    ///
    /// Positions that were overwritten by another node stay with that node.
    pub fn remove_node(&mut self, node: &ServerNode) -> usize {
        let mut removed = 0;
        for index in 0..self.vnodes_per_node {
            let position = self.position_of(node, index);
            if self.points.get(&position).is_some_and(|owner| owner.as_ref() == node) {
                self.points.remove(&position);
                removed += 1;
            }
        }
        debug!(%node, removed, "removed node from ring");
        removed
    }

    /// Node responsible for `key`, or `None` on an empty ring.
    pub fn lookup_owner(&self, key: &str) -> Option<&Arc<ServerNode>> {
        self.lookup_owner_of_hash(self.hasher.hash(key))
    }

    /// Node owning ring position `position`: the first point at or after it,
    /// wrapping around to the smallest point.
    pub fn lookup_owner_of_hash(&self, position: Position) -> Option<&Arc<ServerNode>> {
        self.points
            .range(position..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| node)
    }

    /// Points whose positions fall inside `range`, ascending.
    pub fn points_in(
        &self,
        range: HashRange,
    ) -> impl Iterator<Item = (Position, &Arc<ServerNode>)> + '_ {
        self.points
            .range(range.start()..=range.end())
            .map(|(position, node)| (*position, node))
    }

    /// Cut `range` into maximal pieces that each have a single owner, in
    /// ascending order. Empty on an empty ring.
    pub fn owners_in(&self, range: HashRange) -> Vec<(HashRange, &Arc<ServerNode>)> {
        let mut pieces = Vec::new();
        let mut cursor = Some(range.start());

        for (position, owner) in self.points_in(range) {
            if let Some(start) = cursor {
                extend_piece(&mut pieces, HashRange::spanning(start, position), owner);
            }
            cursor = position.checked_add(1);
        }

        if let Some(start) = cursor.filter(|start| *start <= range.end()) {
            if let Some(owner) = self.lookup_owner_of_hash(start) {
                extend_piece(&mut pieces, HashRange::spanning(start, range.end()), owner);
            }
        }

        pieces
    }

    /// Node whose virtual point sits exactly at `position`, if any.
    pub fn owner_at(&self, position: Position) -> Option<&Arc<ServerNode>> {
        self.points.get(&position)
    }

    /// Contiguous ranges of positions owned by `node`, sorted by start.
    ///
    /// Each maximal run of consecutive points owned by `node` yields the arc
    /// from just after the preceding foreign point up to the run's last point.
    /// The point before the smallest one is the largest one. Arcs crossing
    /// `Position::MAX` are split in two. Across all nodes the result
    /// partitions the hash space.
    pub fn ranges_owned_by(&self, node: &ServerNode) -> Vec<HashRange> {
        let points: Vec<(Position, bool)> = self
            .points
            .iter()
            .map(|(position, owner)| (*position, owner.as_ref() == node))
            .collect();

        if !points.iter().any(|(_, owned)| *owned) {
            return Vec::new();
        }
        if points.iter().all(|(_, owned)| *owned) {
            return vec![HashRange::FULL];
        }

        let n = points.len();
        let mut ranges = Vec::new();

        for first in 0..n {
            let before = (first + n - 1) % n;
            if !points[first].1 || points[before].1 {
                continue;
            }

            let mut last = first;
            while points[(last + 1) % n].1 {
                last = (last + 1) % n;
            }

            let after = points[before].0;
            let end = points[last].0;
            if before < last {
                ranges.push(HashRange::spanning(after + 1, end));
            } else if after == Position::MAX {
                ranges.push(HashRange::spanning(Position::MIN, end));
            } else {
                ranges.push(HashRange::spanning(after + 1, Position::MAX));
                ranges.push(HashRange::spanning(Position::MIN, end));
            }
        }

        ranges.sort();
        ranges
    }

    /// Distinct nodes holding at least one point, sorted by address.
    pub fn node_set(&self) -> Vec<Arc<ServerNode>> {
        self.points
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether `node` holds at least one point.
    pub fn contains_node(&self, node: &ServerNode) -> bool {
        self.points.values().any(|owner| owner.as_ref() == node)
    }

    /// Number of distinct nodes on the ring.
    pub fn node_count(&self) -> usize {
        self.node_set().len()
    }

    /// Number of virtual points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the ring holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points placed per node.
    pub fn vnodes_per_node(&self) -> u32 {
        self.vnodes_per_node
    }

    /// All point positions in ascending order.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.points.keys().copied()
    }

    /// All points in ascending position order.
    pub fn points(&self) -> impl Iterator<Item = (Position, &Arc<ServerNode>)> + '_ {
        self.points.iter().map(|(position, node)| (*position, node))
    }
}

fn extend_piece<'a>(
    pieces: &mut Vec<(HashRange, &'a Arc<ServerNode>)>,
    range: HashRange,
    owner: &'a Arc<ServerNode>,
) {
    if let Some((last, last_owner)) = pieces.last_mut() {
        if *last_owner == owner {
            *last = HashRange::spanning(last.start(), range.end());
            return;
        }
    }
    pieces.push((range, owner));
}

impl fmt::Debug for HashRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRing")
            .field("vnodes_per_node", &self.vnodes_per_node)
            .field("points", &self.points.len())
            .finish_non_exhaustive()
    }
}
