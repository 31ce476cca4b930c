//! OpenEndpoint metadata store
//!
//! Ordered key-value storage for all non-payload state, backed by an
//! embedded redb database (single file, fsync on commit). Logical
//! namespaces are encoded as key prefixes; values are bincode-encoded
//! records or opaque caller-supplied blobs. A capacity-bound LRU read
//! cache fronts point lookups and is updated before a write returns, so a
//! successful put is never followed by a stale read.

pub mod cache;
pub mod keys;
pub mod records;
pub mod store;

pub use cache::{CacheStats, LruCache};
pub use records::{
    BucketRecord, BucketStatsRecord, CompletedPartRecord, LegalHoldRecord, LifecycleConfigRecord,
    LifecycleRule, MultipartRecord, ObjectRecord, PartRecord, RetentionMode, RetentionRecord,
    VersioningRecord,
};
pub use store::MetaStore;
