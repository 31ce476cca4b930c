//! Metadata record types
//!
//! Every record round-trips through bincode. Optional fields survive the
//! round trip as `Option`; opaque per-bucket configurations are stored as
//! raw blobs and never pass through these types.

use openep_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Encode a record for storage
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a stored record
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

/// A bucket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    /// Bucket name (unique within the store)
    pub name: String,
    /// Creation time, seconds since epoch
    pub created_at: u64,
    /// Owner identifier
    pub owner: String,
    /// Region tag
    pub region: String,
}

/// An object version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Object key within its bucket
    pub key: String,
    /// Payload size in bytes
    pub size: u64,
    /// Quoted-hex content ETag (single-part) or composite token (multipart)
    pub etag: String,
    /// Content-Type, when supplied
    pub content_type: Option<String>,
    /// Content-Encoding, when supplied
    pub content_encoding: Option<String>,
    /// Cache-Control, when supplied
    pub cache_control: Option<String>,
    /// User metadata (x-amz-meta-*)
    pub user_metadata: BTreeMap<String, String>,
    /// Storage class tag
    pub storage_class: String,
    /// Version identifier assigned at write time
    pub version_id: String,
    /// Whether this record is the latest version of the key
    pub is_latest: bool,
    /// Whether this record is a delete marker
    pub is_delete_marker: bool,
    /// Last-modified time, seconds since epoch
    pub last_modified: u64,
    /// Byte-store key holding the payload
    pub store_key: String,
    /// Ordered part list for multipart-composed objects
    pub parts: Option<Vec<CompletedPartRecord>>,
}

/// One entry of a completed multipart composition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPartRecord {
    /// Part number (≥ 1, not necessarily contiguous)
    pub part_number: u32,
    /// Quoted-hex ETag of the part bytes
    pub etag: String,
    /// Part size in bytes
    pub size: u64,
}

/// A pending multipart upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartRecord {
    /// Upload identifier (unique across the store)
    pub upload_id: String,
    /// Destination bucket
    pub bucket: String,
    /// Destination key
    pub key: String,
    /// Initiation time, seconds since epoch
    pub initiated_at: u64,
    /// Content-Type to apply on completion
    pub content_type: Option<String>,
    /// User metadata to apply on completion
    pub user_metadata: BTreeMap<String, String>,
}

/// An uploaded part awaiting completion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    /// Part number (≥ 1)
    pub part_number: u32,
    /// Quoted-hex ETag of the part bytes
    pub etag: String,
    /// Raw SHA-256 digest of the part bytes (feeds the composite ETag)
    pub digest: [u8; 32],
    /// Part size in bytes
    pub size: u64,
    /// Upload time, seconds since epoch
    pub last_modified: u64,
    /// Byte-store key holding the temporary part shard
    pub store_key: String,
}

/// Per-bucket object counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStatsRecord {
    /// Number of live objects
    pub object_count: u64,
    /// Total live payload bytes
    pub total_bytes: u64,
}

/// Versioning state of a bucket
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningRecord {
    /// Whether versioning is enabled
    pub enabled: bool,
}

/// Object retention mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionMode {
    /// Overridable by privileged callers
    Governance,
    /// Not overridable until expiry
    Compliance,
}

/// Retention applied to one object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRecord {
    /// Retention mode
    pub mode: RetentionMode,
    /// Retain-until time, seconds since epoch
    pub retain_until: u64,
}

impl RetentionRecord {
    /// Whether the retention period is still in effect at `now`
    #[must_use]
    pub fn in_effect(&self, now: u64) -> bool {
        now < self.retain_until
    }
}

/// Legal hold applied to one object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalHoldRecord {
    /// Whether the hold is ON
    pub enabled: bool,
}

/// One lifecycle rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRule {
    /// Rule identifier (unique within the bucket configuration)
    pub id: String,
    /// Key prefix the rule applies to (empty = whole bucket)
    pub prefix: String,
    /// Whether the rule is enabled
    pub enabled: bool,
    /// Expire current objects after this many days
    pub expiration_days: Option<u32>,
    /// Abort incomplete multipart uploads after this many days
    pub abort_incomplete_multipart_days: Option<u32>,
}

/// Ordered lifecycle rule sequence for a bucket
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfigRecord {
    /// Rules in evaluation order
    pub rules: Vec<LifecycleRule>,
}

impl LifecycleConfigRecord {
    /// Insert or replace a rule by its ID, preserving order on replace
    pub fn upsert_rule(&mut self, rule: LifecycleRule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    /// Remove a rule by ID; returns whether it existed
    pub fn remove_rule(&mut self, id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        self.rules.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_record_roundtrip_with_options() {
        let record = ObjectRecord {
            key: "a.txt".into(),
            size: 5,
            etag: "\"abc\"".into(),
            content_type: Some("text/plain".into()),
            content_encoding: None,
            cache_control: None,
            user_metadata: BTreeMap::from([("owner".into(), "me".into())]),
            storage_class: "STANDARD".into(),
            version_id: "v1".into(),
            is_latest: true,
            is_delete_marker: false,
            last_modified: 1_700_000_000,
            store_key: "a.txt".into(),
            parts: None,
        };
        let decoded: ObjectRecord = decode(&encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.content_encoding, None);
    }

    #[test]
    fn test_lifecycle_upsert_by_id() {
        let mut config = LifecycleConfigRecord::default();
        config.upsert_rule(LifecycleRule {
            id: "expire-tmp".into(),
            prefix: "tmp/".into(),
            enabled: true,
            expiration_days: Some(7),
            abort_incomplete_multipart_days: None,
        });
        config.upsert_rule(LifecycleRule {
            id: "abort-mpu".into(),
            prefix: String::new(),
            enabled: true,
            expiration_days: None,
            abort_incomplete_multipart_days: Some(3),
        });
        // Replace keeps position
        config.upsert_rule(LifecycleRule {
            id: "expire-tmp".into(),
            prefix: "tmp/".into(),
            enabled: false,
            expiration_days: Some(30),
            abort_incomplete_multipart_days: None,
        });

        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].id, "expire-tmp");
        assert_eq!(config.rules[0].expiration_days, Some(30));
        assert!(!config.rules[0].enabled);

        assert!(config.remove_rule("abort-mpu"));
        assert!(!config.remove_rule("abort-mpu"));
    }

    #[test]
    fn test_retention_in_effect() {
        let retention = RetentionRecord {
            mode: RetentionMode::Compliance,
            retain_until: 100,
        };
        assert!(retention.in_effect(99));
        assert!(!retention.in_effect(100));
    }
}
