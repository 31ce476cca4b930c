//! Pluggable 32-bit ring hash functions
//!
//! All implementations are deterministic across runs and platforms, so a
//! restarted node computes the same placement for the same ring state.

/// A 32-bit hash function for ring placement
pub trait RingHasher: Send + Sync {
    /// Hash arbitrary bytes to a ring position
    fn hash(&self, data: &[u8]) -> u32;

    /// Stable name for diagnostics
    fn name(&self) -> &'static str;
}

/// CRC32C (Castagnoli) ring hash; the default
#[derive(Clone, Copy, Debug, Default)]
pub struct Crc32Hasher;

impl RingHasher for Crc32Hasher {
    fn hash(&self, data: &[u8]) -> u32 {
        crc32c::crc32c(data)
    }

    fn name(&self) -> &'static str {
        "crc32c"
    }
}

/// xxHash64 truncated to 32 bits
#[derive(Clone, Copy, Debug, Default)]
pub struct Xxh64Hasher;

impl RingHasher for Xxh64Hasher {
    fn hash(&self, data: &[u8]) -> u32 {
        xxhash_rust::xxh64::xxh64(data, 0) as u32
    }

    fn name(&self) -> &'static str {
        "xxh64"
    }
}

/// FNV-1a, 32-bit
#[derive(Clone, Copy, Debug, Default)]
pub struct FnvHasher;

impl RingHasher for FnvHasher {
    fn hash(&self, data: &[u8]) -> u32 {
        const FNV_OFFSET: u32 = 0x811c_9dc5;
        const FNV_PRIME: u32 = 0x0100_0193;
        let mut hash = FNV_OFFSET;
        for &byte in data {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    fn name(&self) -> &'static str {
        "fnv1a"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        for hasher in [
            &Crc32Hasher as &dyn RingHasher,
            &Xxh64Hasher,
            &FnvHasher,
        ] {
            assert_eq!(hasher.hash(b"key42"), hasher.hash(b"key42"), "{}", hasher.name());
            assert_ne!(hasher.hash(b"key42"), hasher.hash(b"key43"), "{}", hasher.name());
        }
    }

    #[test]
    fn test_fnv_known_value() {
        // FNV-1a of empty input is the offset basis
        assert_eq!(FnvHasher.hash(b""), 0x811c_9dc5);
    }
}
