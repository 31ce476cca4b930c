//! Checksum utilities for OpenEndpoint
//!
//! Content ETags are the quoted hex SHA-256 of the payload; multipart
//! completions use a composite digest over the ordered part digests.
//! CRC32C is used for cheap shard integrity checks on the cluster plane.

use sha2::{Digest, Sha256};

/// Streaming ETag calculator
///
/// Feeds every chunk of an incoming payload through SHA-256 while counting
/// bytes, so a single pass over the stream yields both the ETag and the
/// actual size.
pub struct EtagHasher {
    sha256: Sha256,
    len: u64,
}

impl EtagHasher {
    /// Create a new calculator
    #[must_use]
    pub fn new() -> Self {
        Self {
            sha256: Sha256::new(),
            len: 0,
        }
    }

    /// Update with more payload bytes
    pub fn update(&mut self, data: &[u8]) {
        self.sha256.update(data);
        self.len += data.len() as u64;
    }

    /// Number of bytes hashed so far
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether any bytes were hashed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finalize, returning the raw digest and the byte count
    #[must_use]
    pub fn finalize(self) -> ([u8; 32], u64) {
        (self.sha256.finalize().into(), self.len)
    }

    /// Finalize into the quoted-hex ETag form
    #[must_use]
    pub fn finalize_etag(self) -> (String, u64) {
        let (digest, len) = self.finalize();
        (format_etag(&digest), len)
    }
}

impl Default for EtagHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a content digest as a quoted hex ETag
#[must_use]
pub fn format_etag(digest: &[u8; 32]) -> String {
    format!("\"{}\"", hex::encode(digest))
}

/// Quoted hex SHA-256 of a full in-memory payload
#[must_use]
pub fn quoted_sha256_hex(data: &[u8]) -> String {
    let digest: [u8; 32] = Sha256::digest(data).into();
    format_etag(&digest)
}

/// Composite ETag for a multipart completion
///
/// S3-style: the digest of the concatenated per-part digests, suffixed with
/// the part count. Derived only from persisted part records, so it is stable
/// across restarts.
#[must_use]
pub fn composite_etag(part_digests: &[[u8; 32]]) -> String {
    let mut hasher = Sha256::new();
    for digest in part_digests {
        hasher.update(digest);
    }
    let combined: [u8; 32] = hasher.finalize().into();
    format!("\"{}-{}\"", hex::encode(combined), part_digests.len())
}

/// Quick CRC32C computation for shard integrity
#[inline]
#[must_use]
pub fn compute_crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Verify data against an expected CRC32C
#[inline]
#[must_use]
pub fn verify_crc32c(data: &[u8], expected: u32) -> bool {
    crc32c::crc32c(data) == expected
}
