//! Consistent hashing ring for key routing and range ownership.
//!
//! This crate implements the ring a sharding master routes keys with. Each
//! storage node contributes a fixed number of virtual points, placed at
//! `hash(address ++ "-" ++ salt)`. Besides successor lookups the ring can
//! report the exact contiguous ranges each node owns, which is what migration
//! planning diffs between two ring versions.

mod hash;
mod ring;

pub use hash::{Blake3Hash, HashFunction, PinnedHash};
pub use ring::{Collision, HashRing};
