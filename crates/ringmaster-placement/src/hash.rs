//! Hash functions mapping strings onto ring positions.

use std::collections::HashMap;

use ringmaster_types::Position;

/// Maps a key (or a virtual-point key) to a ring position.
pub trait HashFunction: Send + Sync {
    /// Hash `key` onto the ring.
    fn hash(&self, key: &str) -> Position;
}

/// Default hash: the first four bytes of `blake3(key)`, little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hash;

impl HashFunction for Blake3Hash {
    fn hash(&self, key: &str) -> Position {
        let digest = blake3::hash(key.as_bytes());
        let bytes = digest.as_bytes();
        Position::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Hash with pinned positions for chosen keys, delegating everything else
/// to [`Blake3Hash`].
///
/// Lets a ring layout be fixed exactly, e.g. to reproduce a known collision or
/// to lay out a small ring by hand.
#[derive(Debug, Clone, Default)]
pub struct PinnedHash {
    pinned: HashMap<String, Position>,
}

impl PinnedHash {
    /// Create a hash with no pinned keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `key` to `position`.
    pub fn pin(mut self, key: impl Into<String>, position: Position) -> Self {
        self.pinned.insert(key.into(), position);
        self
    }
}

impl HashFunction for PinnedHash {
    fn hash(&self, key: &str) -> Position {
        match self.pinned.get(key) {
            Some(position) => *position,
            None => Blake3Hash.hash(key),
        }
    }
}
