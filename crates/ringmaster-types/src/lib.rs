//! Shared types for Ringmaster.
//!
//! This crate defines the vocabulary used across the workspace:
//! ring coordinates ([`Position`]), inclusive position intervals
//! ([`HashRange`]) and storage node identities with their virtual-point salt
//! tables ([`ServerNode`]).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A coordinate on the circular hash space. `Position::MAX` wraps to `Position::MIN`.
pub type Position = i32;

/// Errors produced when constructing shared types from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    /// A range whose start lies after its end.
    #[error("invalid range [{start}, {end}]: start is after end")]
    InvalidRange {
        /// Requested start.
        start: Position,
        /// Requested end.
        end: Position,
    },

    /// Two ranges were merged that do not touch.
    #[error("ranges {0} and {1} do not overlap")]
    DisjointMerge(HashRange, HashRange),

    /// A node address that cannot identify anything.
    #[error("node address must not be empty")]
    EmptyAddress,
}

// ---------------------------------------------------------------------------
// HashRange
// ---------------------------------------------------------------------------

/// An inclusive interval `[start, end]` of ring positions.
///
/// `start <= end` always holds. A segment of the ring that wraps past
/// [`Position::MAX`] is represented as two ranges, never as one with
/// `start > end`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashRange {
    start: Position,
    end: Position,
}

impl HashRange {
    /// The entire hash space.
    pub const FULL: HashRange = HashRange {
        start: Position::MIN,
        end: Position::MAX,
    };

    /// Create a range, rejecting `start > end`.
    pub fn new(start: Position, end: Position) -> Result<Self, TypesError> {
        if start > end {
            return Err(TypesError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range between two bounds given in either order.
    pub fn spanning(a: Position, b: Position) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// First position in the range.
    pub fn start(&self) -> Position {
        self.start
    }

    /// Last position in the range (inclusive).
    pub fn end(&self) -> Position {
        self.end
    }

    /// Number of positions covered.
    pub fn len(&self) -> u64 {
        (i64::from(self.end) - i64::from(self.start) + 1) as u64
    }

    /// Ranges always hold at least one position.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `position` lies inside the range.
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    /// Whether the two ranges share at least one position.
    pub fn overlaps(&self, other: &HashRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Union of two overlapping ranges.
    pub fn merge(a: HashRange, b: HashRange) -> Result<HashRange, TypesError> {
        if !a.overlaps(&b) {
            return Err(TypesError::DisjointMerge(a, b));
        }
        Ok(HashRange {
            start: a.start.min(b.start),
            end: a.end.max(b.end),
        })
    }
}

impl Ord for HashRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl PartialOrd for HashRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for HashRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

impl fmt::Debug for HashRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashRange{self}")
    }
}

// ---------------------------------------------------------------------------
// ServerNode
// ---------------------------------------------------------------------------

/// A storage node, identified by its network address.
///
/// Equality, ordering and hashing consider the address only. The salt table
/// maps a virtual-point index to the string hashed in place of the index, so
/// that a known position collision can be broken without changing how many
/// points the node has.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerNode {
    address: String,
    #[serde(default)]
    salts: BTreeMap<u32, String>,
}

impl ServerNode {
    /// Prefix of generated alternate salts.
    pub const BASE_SALT: &'static str = "salty";

    /// Create a node with the default salt table.
    pub fn new(address: impl Into<String>) -> Result<Self, TypesError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(TypesError::EmptyAddress);
        }
        Ok(Self {
            address,
            salts: BTreeMap::new(),
        })
    }

    /// The node's network address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Explicit salt overrides, keyed by virtual-point index.
    pub fn salts(&self) -> &BTreeMap<u32, String> {
        &self.salts
    }

    /// Salt for virtual point `index`: the override if present, otherwise the
    /// index itself.
    pub fn salt(&self, index: u32) -> String {
        self.salts
            .get(&index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }

    /// Override the salt of virtual point `index`.
    pub fn set_salt(&mut self, index: u32, salt: impl Into<String>) {
        self.salts.insert(index, salt.into());
    }

    /// Override the salt of virtual point `index` with the `attempt`-th
    /// alternate (`"salty0"`, `"salty1"`, ...).
    pub fn set_alternate_salt(&mut self, index: u32, attempt: u32) {
        self.set_salt(index, format!("{}{attempt}", Self::BASE_SALT));
    }

    /// String hashed to place virtual point `index`: `address-salt`.
    pub fn point_key(&self, index: u32) -> String {
        format!("{}-{}", self.address, self.salt(index))
    }
}

impl PartialEq for ServerNode {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for ServerNode {}

impl Hash for ServerNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl Ord for ServerNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}

impl PartialOrd for ServerNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ServerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl fmt::Debug for ServerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.salts.is_empty() {
            write!(f, "ServerNode({})", self.address)
        } else {
            write!(f, "ServerNode({}, salts={:?})", self.address, self.salts)
        }
    }
}
