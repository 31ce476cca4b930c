//! Main metadata store
//!
//! A single redb table `meta` maps namespaced string keys to raw values.
//! Point lookups go through the LRU cache; range scans always read the
//! table. Every write commits synchronously before the call returns.

use crate::cache::LruCache;
use crate::keys;
use crate::records::{
    self, BucketRecord, BucketStatsRecord, LegalHoldRecord, LifecycleConfigRecord, LifecycleRule,
    MultipartRecord, ObjectRecord, PartRecord, RetentionRecord, VersioningRecord,
};
use openep_common::{Error, Result};
use redb::{Database, TableDefinition};
use std::path::Path;
use tracing::info;

const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const DEFAULT_CACHE_CAPACITY: usize = 10_000;

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::internal(format!("metadata store: {e}"))
}

/// Embedded ordered key-value metadata store
pub struct MetaStore {
    db: Database,
    cache: LruCache,
}

impl MetaStore {
    /// Open (or create) the store under `<root>/metadata`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_cache(root, DEFAULT_CACHE_CAPACITY)
    }

    /// Open with an explicit read-cache capacity
    pub fn open_with_cache(root: impl AsRef<Path>, cache_capacity: usize) -> Result<Self> {
        let dir = root.as_ref().join("metadata");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("meta.redb");
        let db = Database::create(&path).map_err(store_err)?;

        // Make sure the table exists so reads never race table creation
        let txn = db.begin_write().map_err(store_err)?;
        txn.open_table(META).map_err(store_err)?;
        txn.commit().map_err(store_err)?;

        info!(path = %path.display(), "opened metadata store");
        Ok(Self {
            db,
            cache: LruCache::new(cache_capacity),
        })
    }

    // Raw operations

    /// Store a raw value; durable on return
    pub fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = txn.open_table(META).map_err(store_err)?;
            table.insert(key, value).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        self.cache.put(key.to_string(), value.to_vec());
        Ok(())
    }

    /// Fetch a raw value
    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value));
        }
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(META).map_err(store_err)?;
        match table.get(key).map_err(store_err)? {
            Some(guard) => {
                let value = guard.value().to_vec();
                self.cache.put(key.to_string(), value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Delete a raw key; returns whether it existed
    pub fn delete_raw(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(store_err)?;
        let existed;
        {
            let mut table = txn.open_table(META).map_err(store_err)?;
            existed = table.remove(key).map_err(store_err)?.is_some();
        }
        txn.commit().map_err(store_err)?;
        self.cache.remove(key);
        Ok(existed)
    }

    /// Collect every `(key, value)` whose key starts with `prefix`, in
    /// ascending key order
    pub fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(META).map_err(store_err)?;
        let mut out = Vec::new();
        for item in table.range(prefix..).map_err(store_err)? {
            let (key, value) = item.map_err(store_err)?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_string(), value.value().to_vec()));
        }
        Ok(out)
    }

    /// Ranged prefix scan with resumption
    ///
    /// Iterates keys > `start_after` (when given) under `prefix`, returning
    /// at most `limit` entries plus a flag telling whether a further entry
    /// exists beyond them.
    pub fn list_range(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<(Vec<(String, Vec<u8>)>, bool)> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(META).map_err(store_err)?;
        let start: &str = match start_after {
            Some(marker) if marker >= prefix => marker,
            _ => prefix,
        };

        let mut out = Vec::new();
        let mut more = false;
        for item in table.range(start..).map_err(store_err)? {
            let (key, value) = item.map_err(store_err)?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(marker) = start_after {
                if key <= marker {
                    continue;
                }
            }
            if out.len() == limit {
                more = true;
                break;
            }
            out.push((key.to_string(), value.value().to_vec()));
        }
        Ok((out, more))
    }

    /// Number of keys under a prefix (bounded scan)
    pub fn count_prefix(&self, prefix: &str, cap: usize) -> Result<usize> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let table = txn.open_table(META).map_err(store_err)?;
        let mut count = 0;
        for item in table.range(prefix..).map_err(store_err)? {
            let (key, _) = item.map_err(store_err)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            count += 1;
            if count >= cap {
                break;
            }
        }
        Ok(count)
    }

    // Buckets

    /// Persist a bucket record, keyed by its name
    pub fn put_bucket(&self, record: &BucketRecord) -> Result<()> {
        self.put_raw(&keys::bucket(&record.name), &records::encode(record)?)
    }

    /// Fetch a bucket record
    pub fn get_bucket(&self, name: &str) -> Result<Option<BucketRecord>> {
        self.get_raw(&keys::bucket(name))?
            .map(|bytes| records::decode(&bytes))
            .transpose()
    }

    /// Remove a bucket record; returns whether it existed
    pub fn delete_bucket(&self, name: &str) -> Result<bool> {
        self.delete_raw(&keys::bucket(name))
    }

    /// All bucket records, ordered by name
    pub fn list_buckets(&self) -> Result<Vec<BucketRecord>> {
        self.list_prefix(keys::BUCKET_PREFIX)?
            .iter()
            .map(|(_, bytes)| records::decode(bytes))
            .collect()
    }

    // Objects

    /// Persist the latest-version object record
    pub fn put_object(&self, bucket: &str, record: &ObjectRecord) -> Result<()> {
        self.put_raw(&keys::object(bucket, &record.key), &records::encode(record)?)
    }

    /// Fetch the latest-version object record
    pub fn get_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectRecord>> {
        self.get_raw(&keys::object(bucket, key))?
            .map(|bytes| records::decode(&bytes))
            .transpose()
    }

    /// Remove the latest-version object record
    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<bool> {
        self.delete_raw(&keys::object(bucket, key))
    }

    /// Persist a retained (non-latest) version record
    pub fn put_object_version(&self, bucket: &str, record: &ObjectRecord) -> Result<()> {
        let key = keys::object_version(bucket, &record.key, &record.version_id);
        self.put_raw(&key, &records::encode(record)?)
    }

    /// Fetch a retained version record
    pub fn get_object_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<Option<ObjectRecord>> {
        self.get_raw(&keys::object_version(bucket, key, version_id))?
            .map(|bytes| records::decode(&bytes))
            .transpose()
    }

    /// Remove a retained version record
    pub fn delete_object_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<bool> {
        self.delete_raw(&keys::object_version(bucket, key, version_id))
    }

    /// All retained versions of one object
    pub fn list_object_versions(&self, bucket: &str, key: &str) -> Result<Vec<ObjectRecord>> {
        self.list_prefix(&keys::object_version_prefix(bucket, key))?
            .iter()
            .map(|(_, bytes)| records::decode(bytes))
            .collect()
    }

    // Multipart uploads

    /// Persist an upload record
    pub fn put_multipart(&self, record: &MultipartRecord) -> Result<()> {
        let key = keys::multipart(&record.bucket, &record.key, &record.upload_id);
        self.put_raw(&key, &records::encode(record)?)
    }

    /// Fetch an upload record
    pub fn get_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Option<MultipartRecord>> {
        self.get_raw(&keys::multipart(bucket, key, upload_id))?
            .map(|bytes| records::decode(&bytes))
            .transpose()
    }

    /// Remove an upload record
    pub fn delete_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<bool> {
        self.delete_raw(&keys::multipart(bucket, key, upload_id))
    }

    /// All pending uploads in a bucket
    pub fn list_multiparts(&self, bucket: &str) -> Result<Vec<MultipartRecord>> {
        self.list_prefix(&keys::multipart_prefix(bucket))?
            .iter()
            .map(|(_, bytes)| records::decode(bytes))
            .collect()
    }

    // Parts

    /// Persist a part record (replaces any previous record for the number)
    pub fn put_part(&self, bucket: &str, key: &str, upload_id: &str, record: &PartRecord) -> Result<()> {
        let meta_key = keys::part(bucket, key, upload_id, record.part_number);
        self.put_raw(&meta_key, &records::encode(record)?)
    }

    /// Fetch one part record
    pub fn get_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<Option<PartRecord>> {
        self.get_raw(&keys::part(bucket, key, upload_id, part_number))?
            .map(|bytes| records::decode(&bytes))
            .transpose()
    }

    /// All parts of one upload, ascending by part number
    pub fn list_parts(&self, bucket: &str, key: &str, upload_id: &str) -> Result<Vec<PartRecord>> {
        self.list_prefix(&keys::part_prefix(bucket, key, upload_id))?
            .iter()
            .map(|(_, bytes)| records::decode(bytes))
            .collect()
    }

    /// Remove every part record of one upload, returning the removed records
    pub fn drain_parts(&self, bucket: &str, key: &str, upload_id: &str) -> Result<Vec<PartRecord>> {
        let parts = self.list_parts(bucket, key, upload_id)?;
        for part in &parts {
            self.delete_raw(&keys::part(bucket, key, upload_id, part.part_number))?;
        }
        Ok(parts)
    }

    // Bucket counters

    /// Current counters for a bucket (zeroed when absent)
    pub fn get_bucket_stats(&self, bucket: &str) -> Result<BucketStatsRecord> {
        Ok(self
            .get_raw(&keys::bucket_stats(bucket))?
            .map(|bytes| records::decode(&bytes))
            .transpose()?
            .unwrap_or_default())
    }

    /// Apply a delta to the bucket counters
    pub fn update_bucket_stats(&self, bucket: &str, objects: i64, bytes: i64) -> Result<()> {
        let mut stats = self.get_bucket_stats(bucket)?;
        stats.object_count = stats.object_count.saturating_add_signed(objects);
        stats.total_bytes = stats.total_bytes.saturating_add_signed(bytes);
        self.put_raw(&keys::bucket_stats(bucket), &records::encode(&stats)?)
    }

    // Versioning

    /// Set the bucket versioning state
    pub fn set_versioning(&self, bucket: &str, enabled: bool) -> Result<()> {
        let record = VersioningRecord { enabled };
        self.put_raw(&keys::versioning(bucket), &records::encode(&record)?)
    }

    /// Whether versioning is enabled for a bucket
    pub fn versioning_enabled(&self, bucket: &str) -> Result<bool> {
        Ok(self
            .get_raw(&keys::versioning(bucket))?
            .map(|bytes| records::decode::<VersioningRecord>(&bytes))
            .transpose()?
            .is_some_and(|record| record.enabled))
    }

    // Retention and legal hold

    /// Apply retention to one object
    pub fn set_retention(&self, bucket: &str, key: &str, record: &RetentionRecord) -> Result<()> {
        self.put_raw(&keys::retention(bucket, key), &records::encode(record)?)
    }

    /// Fetch retention for one object
    pub fn get_retention(&self, bucket: &str, key: &str) -> Result<Option<RetentionRecord>> {
        self.get_raw(&keys::retention(bucket, key))?
            .map(|bytes| records::decode(&bytes))
            .transpose()
    }

    /// Set the legal-hold flag for one object
    pub fn set_legal_hold(&self, bucket: &str, key: &str, enabled: bool) -> Result<()> {
        let record = LegalHoldRecord { enabled };
        self.put_raw(&keys::legal_hold(bucket, key), &records::encode(&record)?)
    }

    /// Whether a legal hold is ON for one object
    pub fn legal_hold_enabled(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self
            .get_raw(&keys::legal_hold(bucket, key))?
            .map(|bytes| records::decode::<LegalHoldRecord>(&bytes))
            .transpose()?
            .is_some_and(|record| record.enabled))
    }

    // Lifecycle

    /// Fetch the lifecycle configuration (empty when absent)
    pub fn get_lifecycle(&self, bucket: &str) -> Result<LifecycleConfigRecord> {
        Ok(self
            .get_raw(&keys::lifecycle(bucket))?
            .map(|bytes| records::decode(&bytes))
            .transpose()?
            .unwrap_or_default())
    }

    /// Replace the lifecycle configuration
    pub fn put_lifecycle(&self, bucket: &str, config: &LifecycleConfigRecord) -> Result<()> {
        self.put_raw(&keys::lifecycle(bucket), &records::encode(config)?)
    }

    /// Insert or replace a single lifecycle rule by its ID
    pub fn upsert_lifecycle_rule(&self, bucket: &str, rule: LifecycleRule) -> Result<()> {
        let mut config = self.get_lifecycle(bucket)?;
        config.upsert_rule(rule);
        self.put_lifecycle(bucket, &config)
    }

    // Opaque bucket configurations

    /// Store an opaque configuration blob under a known namespace
    pub fn put_bucket_config(&self, namespace: &str, bucket: &str, blob: &[u8]) -> Result<()> {
        if !keys::BUCKET_CONFIG_NAMESPACES.contains(&namespace) {
            return Err(Error::invalid_argument(format!(
                "unknown bucket configuration namespace: {namespace}"
            )));
        }
        self.put_raw(&keys::bucket_config(namespace, bucket), blob)
    }

    /// Fetch an opaque configuration blob
    pub fn get_bucket_config(&self, namespace: &str, bucket: &str) -> Result<Option<Vec<u8>>> {
        self.get_raw(&keys::bucket_config(namespace, bucket))
    }

    /// Remove an opaque configuration blob
    pub fn delete_bucket_config(&self, namespace: &str, bucket: &str) -> Result<bool> {
        self.delete_raw(&keys::bucket_config(namespace, bucket))
    }

    /// Store a keyed opaque configuration blob (inventory/analytics/metrics)
    pub fn put_bucket_id_config(
        &self,
        namespace: &str,
        bucket: &str,
        id: &str,
        blob: &[u8],
    ) -> Result<()> {
        if !keys::BUCKET_ID_CONFIG_NAMESPACES.contains(&namespace) {
            return Err(Error::invalid_argument(format!(
                "unknown keyed configuration namespace: {namespace}"
            )));
        }
        self.put_raw(&keys::bucket_id_config(namespace, bucket, id), blob)
    }

    /// Fetch a keyed opaque configuration blob
    pub fn get_bucket_id_config(
        &self,
        namespace: &str,
        bucket: &str,
        id: &str,
    ) -> Result<Option<Vec<u8>>> {
        self.get_raw(&keys::bucket_id_config(namespace, bucket, id))
    }

    /// All keyed configuration blobs of one namespace in a bucket
    pub fn list_bucket_id_configs(
        &self,
        namespace: &str,
        bucket: &str,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let prefix = keys::bucket_id_config_prefix(namespace, bucket);
        Ok(self
            .list_prefix(&prefix)?
            .into_iter()
            .map(|(key, value)| (key[prefix.len()..].to_string(), value))
            .collect())
    }

    /// Remove every configuration, counter and versioning record of a
    /// bucket (called on bucket delete)
    pub fn purge_bucket_state(&self, bucket: &str) -> Result<()> {
        for namespace in keys::BUCKET_CONFIG_NAMESPACES {
            self.delete_raw(&keys::bucket_config(namespace, bucket))?;
        }
        for namespace in keys::BUCKET_ID_CONFIG_NAMESPACES {
            let prefix = keys::bucket_id_config_prefix(namespace, bucket);
            for (key, _) in self.list_prefix(&prefix)? {
                self.delete_raw(&key)?;
            }
        }
        self.delete_raw(&keys::bucket_stats(bucket))?;
        Ok(())
    }

    // Presigned URLs

    /// Record a presigned URL grant (opaque to the store)
    pub fn put_presigned(&self, url: &str, blob: &[u8]) -> Result<()> {
        self.put_raw(&keys::presigned(url), blob)
    }

    /// Fetch a presigned URL grant
    pub fn get_presigned(&self, url: &str) -> Result<Option<Vec<u8>>> {
        self.get_raw(&keys::presigned(url))
    }

    /// Revoke a presigned URL grant; returns whether it existed
    pub fn delete_presigned(&self, url: &str) -> Result<bool> {
        self.delete_raw(&keys::presigned(url))
    }

    /// Read-cache hit ratio (diagnostics)
    #[must_use]
    pub fn cache_hit_ratio(&self) -> f64 {
        self.cache.stats().hit_ratio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn object_record(key: &str, size: u64) -> ObjectRecord {
        ObjectRecord {
            key: key.into(),
            size,
            etag: "\"etag\"".into(),
            content_type: None,
            content_encoding: None,
            cache_control: None,
            user_metadata: BTreeMap::new(),
            storage_class: "STANDARD".into(),
            version_id: "v1".into(),
            is_latest: true,
            is_delete_marker: false,
            last_modified: 0,
            store_key: key.into(),
            parts: None,
        }
    }

    #[test]
    fn test_put_get_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();

        store.put_object("docs", &object_record("a.txt", 5)).unwrap();
        let fetched = store.get_object("docs", "a.txt").unwrap().unwrap();
        assert_eq!(fetched.size, 5);

        assert!(store.delete_object("docs", "a.txt").unwrap());
        assert!(!store.delete_object("docs", "a.txt").unwrap());
        assert!(store.get_object("docs", "a.txt").unwrap().is_none());
    }

    #[test]
    fn test_cache_never_stale() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();

        store.put_raw("bucket:docs", b"one").unwrap();
        assert_eq!(store.get_raw("bucket:docs").unwrap().unwrap(), b"one");
        // Overwrite after the cache is warm
        store.put_raw("bucket:docs", b"two").unwrap();
        assert_eq!(store.get_raw("bucket:docs").unwrap().unwrap(), b"two");
        store.delete_raw("bucket:docs").unwrap();
        assert!(store.get_raw("bucket:docs").unwrap().is_none());
    }

    #[test]
    fn test_list_prefix_ordered() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();

        for key in ["object:b/c", "object:b/a", "object:b/b", "object:other/x"] {
            store.put_raw(key, b"v").unwrap();
        }
        let listed = store.list_prefix("object:b/").unwrap();
        let keys: Vec<_> = listed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["object:b/a", "object:b/b", "object:b/c"]);
    }

    #[test]
    fn test_list_range_truncation() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();

        for key in ["object:b/a", "object:b/b", "object:b/c"] {
            store.put_raw(key, b"v").unwrap();
        }

        let (page, more) = store.list_range("object:b/", None, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert!(more);

        // Exactly the remaining entry: not truncated
        let (page, more) = store.list_range("object:b/", Some("object:b/b"), 2).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].0, "object:b/c");
        assert!(!more);

        // Page size equal to total: not truncated
        let (page, more) = store.list_range("object:b/", None, 3).unwrap();
        assert_eq!(page.len(), 3);
        assert!(!more);
    }

    #[test]
    fn test_parts_ordered_and_overwritten() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();

        for number in [2u32, 1, 10] {
            let part = PartRecord {
                part_number: number,
                etag: format!("\"{number}\""),
                digest: [0; 32],
                size: 2,
                last_modified: 0,
                store_key: format!("k\0u\0{number}"),
            };
            store.put_part("b", "k", "u", &part).unwrap();
        }
        // Overwrite part 1
        let replacement = PartRecord {
            part_number: 1,
            etag: "\"new\"".into(),
            digest: [1; 32],
            size: 4,
            last_modified: 1,
            store_key: "k\0u\01".into(),
        };
        store.put_part("b", "k", "u", &replacement).unwrap();

        let parts = store.list_parts("b", "k", "u").unwrap();
        let numbers: Vec<_> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 10]);
        assert_eq!(parts[0].etag, "\"new\"");

        let drained = store.drain_parts("b", "k", "u").unwrap();
        assert_eq!(drained.len(), 3);
        assert!(store.list_parts("b", "k", "u").unwrap().is_empty());
    }

    #[test]
    fn test_bucket_stats_deltas() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();

        store.update_bucket_stats("docs", 1, 100).unwrap();
        store.update_bucket_stats("docs", 1, 50).unwrap();
        store.update_bucket_stats("docs", -1, -100).unwrap();
        let stats = store.get_bucket_stats("docs").unwrap();
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.total_bytes, 50);
    }

    #[test]
    fn test_config_namespaces() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();

        store.put_bucket_config("cors", "docs", b"{}").unwrap();
        assert_eq!(store.get_bucket_config("cors", "docs").unwrap().unwrap(), b"{}");
        assert!(store.put_bucket_config("bogus", "docs", b"{}").is_err());

        store.put_bucket_id_config("inventory", "docs", "daily", b"cfg").unwrap();
        let listed = store.list_bucket_id_configs("inventory", "docs").unwrap();
        assert_eq!(listed, vec![("daily".to_string(), b"cfg".to_vec())]);

        store.purge_bucket_state("docs").unwrap();
        assert!(store.get_bucket_config("cors", "docs").unwrap().is_none());
        assert!(store.list_bucket_id_configs("inventory", "docs").unwrap().is_empty());
    }

    #[test]
    fn test_versioning_and_retention() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();

        assert!(!store.versioning_enabled("docs").unwrap());
        store.set_versioning("docs", true).unwrap();
        assert!(store.versioning_enabled("docs").unwrap());

        assert!(store.get_retention("docs", "a").unwrap().is_none());
        store
            .set_retention(
                "docs",
                "a",
                &RetentionRecord {
                    mode: crate::records::RetentionMode::Compliance,
                    retain_until: u64::MAX,
                },
            )
            .unwrap();
        assert!(store.get_retention("docs", "a").unwrap().unwrap().in_effect(0));

        assert!(!store.legal_hold_enabled("docs", "a").unwrap());
        store.set_legal_hold("docs", "a", true).unwrap();
        assert!(store.legal_hold_enabled("docs", "a").unwrap());
    }

    #[test]
    fn test_presigned_grants() {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();

        let url = "/s3/docs/a.txt?X-Expires=60";
        store.put_presigned(url, b"grant").unwrap();
        assert_eq!(store.get_presigned(url).unwrap().unwrap(), b"grant");
        assert!(store.delete_presigned(url).unwrap());
        assert!(store.get_presigned(url).unwrap().is_none());
    }

    #[test]
    fn test_durability_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = MetaStore::open(dir.path()).unwrap();
            store
                .put_bucket(&BucketRecord {
                    name: "docs".into(),
                    created_at: 42,
                    owner: "owner".into(),
                    region: "us-east-1".into(),
                })
                .unwrap();
        }
        let store = MetaStore::open(dir.path()).unwrap();
        let bucket = store.get_bucket("docs").unwrap().unwrap();
        assert_eq!(bucket.created_at, 42);
        assert_eq!(store.list_buckets().unwrap().len(), 1);
    }
}
