//! OpenEndpoint consistent hash ring
//!
//! A circular 32-bit key space. Every physical node contributes V virtual
//! points; a key is owned by the nodes at the first V-points at or after
//! its hash, walking clockwise and collecting distinct physical nodes.
//! Reads are concurrent; mutations take the exclusive side of one
//! reader/writer lock.

pub mod hash;
pub mod ring;

pub use hash::{Crc32Hasher, FnvHasher, RingHasher, Xxh64Hasher};
pub use ring::{HashRing, RingEntry, DEFAULT_VIRTUAL_NODES};
