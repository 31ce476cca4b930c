//! Object service
//!
//! The logical object API over ByteStore + MetaStore + LockRegistry.
//! Writes are bytes-first: the payload is durable before the metadata
//! record is committed, and an orphaned payload is deleted best-effort
//! when the metadata write fails. Reads take the shared side of the
//! per-key lock; mutations take the exclusive side.

use crate::locks::LockRegistry;
use openep_bytestore::{ByteStore, GetOptions};
use openep_common::checksum::EtagHasher;
use openep_common::{BucketName, Error, ObjectKey, Result, VersionId};
use openep_meta::{BucketRecord, LifecycleConfigRecord, LifecycleRule, MetaStore, ObjectRecord, RetentionMode, RetentionRecord};
use openep_meta::keys;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, error, warn};

/// Seconds since the Unix epoch
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Byte-store key for a retained object version
pub(crate) fn versioned_store_key(key: &str, version_id: &str) -> String {
    format!("{key}\0{version_id}")
}

/// Byte-store key for a temporary part shard
pub(crate) fn part_store_key(key: &str, upload_id: &str, part_number: u32) -> String {
    format!("{key}\0{upload_id}\0{part_number:05}")
}

/// AsyncRead adapter that hashes and counts everything passing through it
pub(crate) struct HashingReader<'a, R: ?Sized> {
    inner: &'a mut R,
    hasher: EtagHasher,
}

impl<'a, R: AsyncRead + Unpin + ?Sized> HashingReader<'a, R> {
    pub(crate) fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            hasher: EtagHasher::new(),
        }
    }

    /// Raw digest and byte count of everything read so far
    pub(crate) fn finalize(self) -> ([u8; 32], u64) {
        self.hasher.finalize()
    }
}

impl<R: AsyncRead + Unpin + ?Sized> AsyncRead for HashingReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let me = self.get_mut();
        let pre = buf.filled().len();
        match Pin::new(&mut *me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                me.hasher.update(&buf.filled()[pre..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Options for [`ObjectService::put_object`]
#[derive(Clone, Debug, Default)]
pub struct PutObjectOptions {
    /// Content-Type to record
    pub content_type: Option<String>,
    /// Content-Encoding to record
    pub content_encoding: Option<String>,
    /// Cache-Control to record
    pub cache_control: Option<String>,
    /// User metadata to record
    pub user_metadata: BTreeMap<String, String>,
    /// Storage class tag (defaults to STANDARD)
    pub storage_class: Option<String>,
}

/// Result of a successful put
#[derive(Clone, Debug)]
pub struct PutObjectResult {
    /// Quoted-hex content ETag
    pub etag: String,
    /// Payload size in bytes
    pub size: u64,
    /// Version identifier assigned to this write
    pub version_id: String,
    /// Last-modified time, seconds since epoch
    pub last_modified: u64,
}

/// Options for [`ObjectService::get_object`]
#[derive(Clone, Debug, Default)]
pub struct GetObjectOptions {
    /// Read a specific retained version instead of the latest
    pub version_id: Option<String>,
    /// Byte range `[start, end)`
    pub range: Option<(u64, u64)>,
}

/// Result of a get: the payload stream plus the full metadata record
pub struct GetObjectResult {
    /// Payload reader; the caller owns closing (dropping) it
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Number of bytes the reader will yield
    pub content_length: u64,
    /// The object record backing this read
    pub record: ObjectRecord,
}

impl std::fmt::Debug for GetObjectResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetObjectResult")
            .field("content_length", &self.content_length)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Options for [`ObjectService::delete_object`]
#[derive(Clone, Debug, Default)]
pub struct DeleteObjectOptions {
    /// Delete a specific retained version instead of the latest
    pub version_id: Option<String>,
    /// Allow overriding Governance-mode retention
    pub bypass_governance: bool,
}

/// Options for [`ObjectService::list_objects`]
#[derive(Clone, Debug)]
pub struct ListObjectsOptions {
    /// Key prefix filter
    pub prefix: String,
    /// Resume strictly after this key
    pub marker: String,
    /// Roll up keys sharing a post-prefix delimiter
    pub delimiter: String,
    /// Page cap over keys + common prefixes
    pub max_keys: usize,
}

impl Default for ListObjectsOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            marker: String::new(),
            delimiter: String::new(),
            max_keys: 1000,
        }
    }
}

/// Result of a list
#[derive(Debug, Default)]
pub struct ListObjectsResult {
    /// Matching object records, lexicographically ordered by key
    pub objects: Vec<ObjectRecord>,
    /// Rolled-up common prefixes, each exactly once
    pub common_prefixes: Vec<String>,
    /// Whether a further entry exists
    pub is_truncated: bool,
    /// Last returned key or prefix, for resumption
    pub next_marker: Option<String>,
}

/// Result of a copy
#[derive(Clone, Debug)]
pub struct CopyObjectResult {
    /// ETag of the destination (same content hash as the source)
    pub etag: String,
    /// Version identifier of the destination write
    pub version_id: String,
    /// Last-modified time of the destination
    pub last_modified: u64,
}

const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
const LIST_SCAN_BATCH: usize = 1000;

/// The full logical object API
pub struct ObjectService {
    bytes: Arc<ByteStore>,
    meta: Arc<MetaStore>,
    locks: LockRegistry,
    owner: String,
    region: String,
}

impl ObjectService {
    /// Create a service over the shared stores
    #[must_use]
    pub fn new(bytes: Arc<ByteStore>, meta: Arc<MetaStore>) -> Self {
        Self {
            bytes,
            meta,
            locks: LockRegistry::new(),
            owner: "openendpoint".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    /// Override the owner / region recorded on new buckets
    #[must_use]
    pub fn with_identity(mut self, owner: impl Into<String>, region: impl Into<String>) -> Self {
        self.owner = owner.into();
        self.region = region.into();
        self
    }

    pub(crate) fn meta(&self) -> &MetaStore {
        &self.meta
    }

    pub(crate) fn bytes(&self) -> &ByteStore {
        &self.bytes
    }

    pub(crate) fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    // Buckets

    /// Create a bucket; the name is validated before anything is written
    pub async fn create_bucket(&self, bucket: &str) -> Result<BucketRecord> {
        let name = BucketName::new(bucket)?;
        if self.meta.get_bucket(bucket)?.is_some() {
            return Err(Error::BucketAlreadyExists(bucket.to_string()));
        }
        self.bytes.create_bucket(&name).await?;

        let record = BucketRecord {
            name: bucket.to_string(),
            created_at: now_secs(),
            owner: self.owner.clone(),
            region: self.region.clone(),
        };
        if let Err(e) = self.meta.put_bucket(&record) {
            // Roll the directory back so a retry starts clean
            let _ = self.bytes.delete_bucket(&name).await;
            return Err(e);
        }
        Ok(record)
    }

    /// Delete a bucket; refuses while any object, version or pending
    /// multipart upload remains under it
    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let name = self.require_bucket(bucket)?;

        if self.meta.count_prefix(&keys::object_prefix(bucket), 1)? > 0
            || self
                .meta
                .count_prefix(&format!("objectversion:{bucket}/"), 1)?
                > 0
        {
            return Err(Error::BucketNotEmpty(bucket.to_string()));
        }
        if !self.meta.list_multiparts(bucket)?.is_empty() {
            return Err(Error::BucketNotEmpty(bucket.to_string()));
        }

        self.bytes.delete_bucket(&name).await?;
        self.meta.delete_bucket(bucket)?;
        self.meta.purge_bucket_state(bucket)?;
        Ok(())
    }

    /// All buckets, ordered by name
    pub fn list_buckets(&self) -> Result<Vec<BucketRecord>> {
        self.meta.list_buckets()
    }

    /// Fetch one bucket record
    pub fn head_bucket(&self, bucket: &str) -> Result<BucketRecord> {
        self.meta
            .get_bucket(bucket)?
            .ok_or_else(|| Error::NoSuchBucket(bucket.to_string()))
    }

    fn require_bucket(&self, bucket: &str) -> Result<BucketName> {
        if self.meta.get_bucket(bucket)?.is_none() {
            return Err(Error::NoSuchBucket(bucket.to_string()));
        }
        Ok(BucketName::new_unchecked(bucket))
    }

    // Objects

    /// Store an object, returning its ETag, size and version
    pub async fn put_object<R>(
        &self,
        bucket: &str,
        key: &str,
        reader: &mut R,
        declared_size: u64,
        options: PutObjectOptions,
    ) -> Result<PutObjectResult>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        ObjectKey::new(key)?;
        let _guard = self.locks.write(bucket, key).await;
        let name = self.require_bucket(bucket)?;
        self.check_mutable(bucket, key, false)?;

        let versioned = self.meta.versioning_enabled(bucket)?;
        let version_id = VersionId::new().to_string();
        let store_key = if versioned {
            versioned_store_key(key, &version_id)
        } else {
            key.to_string()
        };

        let mut hashing = HashingReader::new(reader);
        self.bytes
            .put(&name, &store_key, &mut hashing, declared_size)
            .await?;
        let (digest, size) = hashing.finalize();
        let etag = openep_common::checksum::format_etag(&digest);

        let last_modified = now_secs();
        let record = ObjectRecord {
            key: key.to_string(),
            size,
            etag: etag.clone(),
            content_type: options.content_type,
            content_encoding: options.content_encoding,
            cache_control: options.cache_control,
            user_metadata: options.user_metadata,
            storage_class: options
                .storage_class
                .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string()),
            version_id: version_id.clone(),
            is_latest: true,
            is_delete_marker: false,
            last_modified,
            store_key,
            parts: None,
        };
        self.publish_object(bucket, &name, record, versioned).await?;

        Ok(PutObjectResult {
            etag,
            size,
            version_id,
            last_modified,
        })
    }

    /// Publish a new latest record: retain the superseded version when
    /// versioning is on, commit metadata (compensating the payload on
    /// failure), clean up a superseded payload otherwise, and update the
    /// bucket counters.
    pub(crate) async fn publish_object(
        &self,
        bucket: &str,
        name: &BucketName,
        record: ObjectRecord,
        versioned: bool,
    ) -> Result<()> {
        let prev = self.meta.get_object(bucket, &record.key)?;

        let commit = || -> Result<()> {
            if let Some(prev) = &prev {
                if versioned {
                    let mut retained = prev.clone();
                    retained.is_latest = false;
                    self.meta.put_object_version(bucket, &retained)?;
                }
            }
            self.meta.put_object(bucket, &record)
        };

        if let Err(e) = commit() {
            warn!(bucket, key = %record.key, error = %e, "metadata write failed, removing orphaned payload");
            if !record.store_key.is_empty() {
                let _ = self.bytes.delete(name, &record.store_key).await;
            }
            return Err(e);
        }

        // Superseded payload is unreachable once versioning is off
        if let Some(prev) = &prev {
            if !versioned
                && !prev.is_delete_marker
                && !prev.store_key.is_empty()
                && prev.store_key != record.store_key
            {
                let _ = self.bytes.delete(name, &prev.store_key).await;
            }
        }

        let prev_live = prev.as_ref().is_some_and(|p| !p.is_delete_marker);
        let prev_size = prev.as_ref().map_or(0, |p| if p.is_delete_marker { 0 } else { p.size });
        let object_delta = i64::from(!prev_live && !record.is_delete_marker)
            - i64::from(prev_live && record.is_delete_marker);
        let byte_delta = record.size as i64 - prev_size as i64;
        if let Err(e) = self.meta.update_bucket_stats(bucket, object_delta, byte_delta) {
            error!(bucket, error = %e, "failed to update bucket counters");
        }
        Ok(())
    }

    /// Open an object for reading
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        options: GetObjectOptions,
    ) -> Result<GetObjectResult> {
        ObjectKey::new(key)?;
        let _guard = self.locks.read(bucket, key).await;
        let name = self.require_bucket(bucket)?;

        let record = self.resolve_record(bucket, key, options.version_id.as_deref())?;
        let (reader, content_length) = self
            .bytes
            .get(
                &name,
                &record.store_key,
                GetOptions {
                    range: options.range,
                },
            )
            .await?;

        Ok(GetObjectResult {
            reader,
            content_length,
            record,
        })
    }

    /// Metadata-only read of the latest (or a specific) version
    pub async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectRecord> {
        ObjectKey::new(key)?;
        let _guard = self.locks.read(bucket, key).await;
        self.require_bucket(bucket)?;
        self.resolve_record(bucket, key, version_id)
    }

    /// Attribute read path; identical record, kept as a separate entry
    /// point for the adapter's GetObjectAttributes operation
    pub async fn get_object_attributes(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectRecord> {
        self.head_object(bucket, key, version_id).await
    }

    fn resolve_record(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectRecord> {
        let latest = self.meta.get_object(bucket, key)?;
        let record = match version_id {
            None => latest,
            Some(version) => match latest {
                Some(record) if record.version_id == version => Some(record),
                _ => self.meta.get_object_version(bucket, key, version)?,
            },
        };
        match record {
            Some(record) if !record.is_delete_marker => Ok(record),
            _ => Err(Error::no_such_key(bucket, key)),
        }
    }

    /// Copy an object; the destination gets a fresh version but the same
    /// content hash and content metadata
    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<CopyObjectResult> {
        ObjectKey::new(dst_key)?;
        let _guard = self.locks.write(dst_bucket, dst_key).await;
        let src_name = self.require_bucket(src_bucket)?;
        let dst_name = self.require_bucket(dst_bucket)?;
        self.check_mutable(dst_bucket, dst_key, false)?;

        let source = self.resolve_record(src_bucket, src_key, None)?;
        let versioned = self.meta.versioning_enabled(dst_bucket)?;
        let version_id = VersionId::new().to_string();
        let store_key = if versioned {
            versioned_store_key(dst_key, &version_id)
        } else {
            dst_key.to_string()
        };

        let (mut reader, _) = self
            .bytes
            .get(&src_name, &source.store_key, GetOptions::default())
            .await?;
        self.bytes
            .put(&dst_name, &store_key, &mut reader, source.size)
            .await?;

        let last_modified = now_secs();
        let record = ObjectRecord {
            key: dst_key.to_string(),
            size: source.size,
            etag: source.etag.clone(),
            content_type: source.content_type.clone(),
            content_encoding: source.content_encoding.clone(),
            cache_control: source.cache_control.clone(),
            user_metadata: source.user_metadata.clone(),
            storage_class: source.storage_class.clone(),
            version_id: version_id.clone(),
            is_latest: true,
            is_delete_marker: false,
            last_modified,
            store_key,
            parts: None,
        };
        self.publish_object(dst_bucket, &dst_name, record, versioned)
            .await?;

        Ok(CopyObjectResult {
            etag: source.etag,
            version_id,
            last_modified,
        })
    }

    /// Delete an object (or one version of it); idempotent
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        options: DeleteObjectOptions,
    ) -> Result<()> {
        ObjectKey::new(key)?;
        let _guard = self.locks.write(bucket, key).await;
        let name = self.require_bucket(bucket)?;
        self.check_mutable(bucket, key, options.bypass_governance)?;

        let versioned = self.meta.versioning_enabled(bucket)?;
        match (&options.version_id, versioned) {
            // Versioned delete without a version: publish a delete marker
            (None, true) => {
                let marker = ObjectRecord {
                    key: key.to_string(),
                    size: 0,
                    etag: String::new(),
                    content_type: None,
                    content_encoding: None,
                    cache_control: None,
                    user_metadata: BTreeMap::new(),
                    storage_class: DEFAULT_STORAGE_CLASS.to_string(),
                    version_id: VersionId::new().to_string(),
                    is_latest: true,
                    is_delete_marker: true,
                    last_modified: now_secs(),
                    store_key: String::new(),
                    parts: None,
                };
                self.publish_object(bucket, &name, marker, true).await
            }
            // Targeted version delete
            (Some(version), _) => self.delete_version(bucket, &name, key, version).await,
            // Plain delete: bytes first, then metadata best-effort
            (None, false) => {
                let Some(record) = self.meta.get_object(bucket, key)? else {
                    return Ok(());
                };
                if !record.store_key.is_empty() {
                    self.bytes.delete(&name, &record.store_key).await?;
                }
                if let Err(e) = self.meta.delete_object(bucket, key) {
                    error!(bucket, key, error = %e, "payload removed but metadata deletion failed");
                } else if !record.is_delete_marker {
                    let _ = self
                        .meta
                        .update_bucket_stats(bucket, -1, -(record.size as i64));
                }
                self.meta.delete_raw(&keys::retention(bucket, key))?;
                self.meta.delete_raw(&keys::legal_hold(bucket, key))?;
                Ok(())
            }
        }
    }

    async fn delete_version(
        &self,
        bucket: &str,
        name: &BucketName,
        key: &str,
        version: &str,
    ) -> Result<()> {
        let latest = self.meta.get_object(bucket, key)?;
        if let Some(latest) = latest.filter(|r| r.version_id == version) {
            if !latest.store_key.is_empty() {
                self.bytes.delete(name, &latest.store_key).await?;
            }
            self.meta.delete_object(bucket, key)?;
            if !latest.is_delete_marker {
                let _ = self
                    .meta
                    .update_bucket_stats(bucket, -1, -(latest.size as i64));
            }

            // Promote the most recent retained version, if any
            let mut versions = self.meta.list_object_versions(bucket, key)?;
            versions.sort_by(|a, b| {
                (a.last_modified, &a.version_id).cmp(&(b.last_modified, &b.version_id))
            });
            if let Some(mut newest) = versions.pop() {
                self.meta
                    .delete_object_version(bucket, key, &newest.version_id)?;
                newest.is_latest = true;
                self.meta.put_object(bucket, &newest)?;
                if !newest.is_delete_marker {
                    let _ = self
                        .meta
                        .update_bucket_stats(bucket, 1, newest.size as i64);
                }
            }
            return Ok(());
        }

        // Not the latest: remove the retained version and its payload
        if let Some(record) = self.meta.get_object_version(bucket, key, version)? {
            if !record.store_key.is_empty() {
                self.bytes.delete(name, &record.store_key).await?;
            }
            self.meta.delete_object_version(bucket, key, version)?;
        }
        Ok(())
    }

    /// List objects under a prefix with optional delimiter roll-up
    ///
    /// Delegates the ordered scan to the metadata range iterator.
    /// Truncation is reported only when a further entry actually exists.
    pub fn list_objects(&self, bucket: &str, options: &ListObjectsOptions) -> Result<ListObjectsResult> {
        self.require_bucket(bucket)?;

        let ns = keys::object_prefix(bucket);
        let scan_prefix = format!("{ns}{}", options.prefix);
        let mut after = if options.marker.is_empty() {
            None
        } else {
            Some(format!("{ns}{}", options.marker))
        };

        let mut result = ListObjectsResult::default();
        if options.max_keys == 0 {
            return Ok(result);
        }

        let mut emitted = 0usize;
        let mut last_emitted: Option<String> = None;
        'scan: loop {
            let (batch, more) =
                self.meta
                    .list_range(&scan_prefix, after.as_deref(), LIST_SCAN_BATCH)?;
            for (meta_key, bytes) in &batch {
                after = Some(meta_key.clone());
                let record: ObjectRecord = openep_meta::records::decode(bytes)?;
                if record.is_delete_marker {
                    continue;
                }

                if !options.delimiter.is_empty() {
                    let remainder = &record.key[options.prefix.len()..];
                    if let Some(i) = remainder.find(&options.delimiter) {
                        let common = record.key
                            [..options.prefix.len() + i + options.delimiter.len()]
                            .to_string();
                        if result.common_prefixes.last() == Some(&common) {
                            continue;
                        }
                        if emitted == options.max_keys {
                            result.is_truncated = true;
                            break 'scan;
                        }
                        last_emitted = Some(common.clone());
                        result.common_prefixes.push(common);
                        emitted += 1;
                        continue;
                    }
                }

                if emitted == options.max_keys {
                    result.is_truncated = true;
                    break 'scan;
                }
                last_emitted = Some(record.key.clone());
                result.objects.push(record);
                emitted += 1;
            }
            if !more {
                break;
            }
        }

        if result.is_truncated {
            result.next_marker = last_emitted;
        }
        Ok(result)
    }

    /// All retained versions of one object (newest last)
    pub fn list_object_versions(&self, bucket: &str, key: &str) -> Result<Vec<ObjectRecord>> {
        self.require_bucket(bucket)?;
        let mut versions = self.meta.list_object_versions(bucket, key)?;
        versions.sort_by_key(|r| r.last_modified);
        Ok(versions)
    }

    // Retention enforcement

    /// Deny mutation while retention or a legal hold is in effect
    fn check_mutable(&self, bucket: &str, key: &str, bypass_governance: bool) -> Result<()> {
        if let Some(retention) = self.meta.get_retention(bucket, key)? {
            let overridable = retention.mode == RetentionMode::Governance && bypass_governance;
            if retention.in_effect(now_secs()) && !overridable {
                return Err(Error::PreconditionFailed(format!(
                    "object {bucket}/{key} is under retention"
                )));
            }
        }
        if self.meta.legal_hold_enabled(bucket, key)? {
            return Err(Error::PreconditionFailed(format!(
                "object {bucket}/{key} is under legal hold"
            )));
        }
        Ok(())
    }

    // Bucket sub-configuration passthrough

    /// Enable or suspend versioning
    pub fn set_versioning(&self, bucket: &str, enabled: bool) -> Result<()> {
        self.require_bucket(bucket)?;
        self.meta.set_versioning(bucket, enabled)
    }

    /// Whether versioning is enabled
    pub fn versioning_enabled(&self, bucket: &str) -> Result<bool> {
        self.require_bucket(bucket)?;
        self.meta.versioning_enabled(bucket)
    }

    /// Apply retention to an object
    pub fn set_retention(&self, bucket: &str, key: &str, record: &RetentionRecord) -> Result<()> {
        self.require_bucket(bucket)?;
        self.meta.set_retention(bucket, key, record)
    }

    /// Set or clear the legal-hold flag
    pub fn set_legal_hold(&self, bucket: &str, key: &str, enabled: bool) -> Result<()> {
        self.require_bucket(bucket)?;
        self.meta.set_legal_hold(bucket, key, enabled)
    }

    /// Fetch the lifecycle configuration
    pub fn get_lifecycle(&self, bucket: &str) -> Result<LifecycleConfigRecord> {
        self.require_bucket(bucket)?;
        self.meta.get_lifecycle(bucket)
    }

    /// Replace the lifecycle configuration
    pub fn put_lifecycle(&self, bucket: &str, config: &LifecycleConfigRecord) -> Result<()> {
        self.require_bucket(bucket)?;
        self.meta.put_lifecycle(bucket, config)
    }

    /// Insert or replace one lifecycle rule by ID
    pub fn upsert_lifecycle_rule(&self, bucket: &str, rule: LifecycleRule) -> Result<()> {
        self.require_bucket(bucket)?;
        self.meta.upsert_lifecycle_rule(bucket, rule)
    }

    /// Store an opaque bucket configuration blob
    pub fn put_bucket_config(&self, namespace: &str, bucket: &str, blob: &[u8]) -> Result<()> {
        self.require_bucket(bucket)?;
        self.meta.put_bucket_config(namespace, bucket, blob)
    }

    /// Fetch an opaque bucket configuration blob
    pub fn get_bucket_config(&self, namespace: &str, bucket: &str) -> Result<Option<Vec<u8>>> {
        self.require_bucket(bucket)?;
        self.meta.get_bucket_config(namespace, bucket)
    }

    /// Delete an opaque bucket configuration blob
    pub fn delete_bucket_config(&self, namespace: &str, bucket: &str) -> Result<bool> {
        self.require_bucket(bucket)?;
        self.meta.delete_bucket_config(namespace, bucket)
    }

    /// Current bucket counters
    pub fn bucket_stats(&self, bucket: &str) -> Result<openep_meta::BucketStatsRecord> {
        self.require_bucket(bucket)?;
        self.meta.get_bucket_stats(bucket)
    }

    /// Drop lock-table entries no caller holds
    pub fn sweep_locks(&self) -> usize {
        let removed = self.locks.sweep_unreferenced();
        if removed > 0 {
            debug!(removed, "swept unreferenced object locks");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    async fn service() -> (tempfile::TempDir, ObjectService) {
        let dir = tempdir().unwrap();
        let bytes = Arc::new(ByteStore::open(dir.path()).unwrap());
        let meta = Arc::new(MetaStore::open(dir.path()).unwrap());
        (dir, ObjectService::new(bytes, meta))
    }

    async fn put(svc: &ObjectService, bucket: &str, key: &str, data: &[u8]) -> PutObjectResult {
        let mut reader = data;
        svc.put_object(bucket, key, &mut reader, data.len() as u64, PutObjectOptions::default())
            .await
            .unwrap()
    }

    async fn body(svc: &ObjectService, bucket: &str, key: &str) -> Vec<u8> {
        let mut result = svc
            .get_object(bucket, key, GetObjectOptions::default())
            .await
            .unwrap();
        let mut buf = Vec::new();
        result.reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_with_known_etag() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();

        let result = put(&svc, "docs", "a.txt", b"hello").await;
        assert_eq!(result.size, 5);
        assert_eq!(
            result.etag,
            "\"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\""
        );

        let get = svc
            .get_object("docs", "a.txt", GetObjectOptions::default())
            .await
            .unwrap();
        assert_eq!(get.content_length, 5);
        assert_eq!(get.record.etag, result.etag);
        assert_eq!(body(&svc, "docs", "a.txt").await, b"hello");

        let stats = svc.bucket_stats("docs").unwrap();
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.total_bytes, 5);
    }

    #[tokio::test]
    async fn test_put_requires_bucket() {
        let (_dir, svc) = service().await;
        let mut reader: &[u8] = b"x";
        let err = svc
            .put_object("missing", "k", &mut reader, 1, PutObjectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchBucket(_)));
    }

    #[tokio::test]
    async fn test_list_prefix_delimiter_groups_once() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();
        put(&svc, "docs", "x/y/z", b"v").await;

        let result = svc
            .list_objects(
                "docs",
                &ListObjectsOptions {
                    prefix: "x/".into(),
                    delimiter: "/".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(result.objects.is_empty());
        assert_eq!(result.common_prefixes, vec!["x/y/".to_string()]);
        assert!(!result.is_truncated);
    }

    #[tokio::test]
    async fn test_list_order_and_exact_page() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();
        for key in ["b", "a", "c"] {
            put(&svc, "docs", key, b"1").await;
        }

        let result = svc
            .list_objects("docs", &ListObjectsOptions { max_keys: 3, ..Default::default() })
            .unwrap();
        let keys: Vec<_> = result.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        // Exactly max_keys entries remain: not truncated
        assert!(!result.is_truncated);

        let result = svc
            .list_objects("docs", &ListObjectsOptions { max_keys: 2, ..Default::default() })
            .unwrap();
        assert!(result.is_truncated);
        assert_eq!(result.next_marker.as_deref(), Some("b"));

        let result = svc
            .list_objects(
                "docs",
                &ListObjectsOptions {
                    marker: "b".into(),
                    max_keys: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        let keys: Vec<_> = result.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["c"]);
        assert!(!result.is_truncated);
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();
        put(&svc, "docs", "a.txt", b"hello").await;

        svc.delete_object("docs", "a.txt", DeleteObjectOptions::default())
            .await
            .unwrap();
        svc.delete_object("docs", "a.txt", DeleteObjectOptions::default())
            .await
            .unwrap();
        svc.delete_object("docs", "never", DeleteObjectOptions::default())
            .await
            .unwrap();

        let stats = svc.bucket_stats("docs").unwrap();
        assert_eq!(stats.object_count, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_bucket_lifecycle_end_to_end() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();
        put(&svc, "docs", "a.txt", b"hello").await;

        assert!(matches!(
            svc.delete_bucket("docs").await.unwrap_err(),
            Error::BucketNotEmpty(_)
        ));
        svc.delete_object("docs", "a.txt", DeleteObjectOptions::default())
            .await
            .unwrap();
        svc.delete_bucket("docs").await.unwrap();
        assert!(svc.list_buckets().unwrap().is_empty());

        assert!(matches!(
            svc.create_bucket("Bad_Name").await.unwrap_err(),
            Error::InvalidBucketName(_)
        ));
        assert!(matches!(
            svc.create_bucket("192.168.1.1").await.unwrap_err(),
            Error::InvalidBucketName(_)
        ));
    }

    #[tokio::test]
    async fn test_copy_object_preserves_content() {
        let (_dir, svc) = service().await;
        svc.create_bucket("src").await.unwrap();
        svc.create_bucket("dst").await.unwrap();
        let original = put(&svc, "src", "a", b"payload").await;

        let copy = svc.copy_object("src", "a", "dst", "b").await.unwrap();
        assert_eq!(copy.etag, original.etag);
        assert_ne!(copy.version_id, original.version_id);
        assert_eq!(body(&svc, "dst", "b").await, b"payload");

        assert!(matches!(
            svc.copy_object("src", "missing", "dst", "c").await.unwrap_err(),
            Error::NoSuchKey { .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_serialize_per_key() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();
        let svc = Arc::new(svc);

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                let data = format!("body-{i}").into_bytes();
                let mut reader = data.as_slice();
                svc.put_object("docs", "hot", &mut reader, data.len() as u64, PutObjectOptions::default())
                    .await
                    .unwrap()
            }));
        }
        let mut etags = Vec::new();
        for handle in handles {
            etags.push(handle.await.unwrap().etag);
        }

        // The surviving object is exactly one of the written bodies
        let get = svc
            .get_object("docs", "hot", GetObjectOptions::default())
            .await
            .unwrap();
        assert!(etags.contains(&get.record.etag));
        let stats = svc.bucket_stats("docs").unwrap();
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.total_bytes, get.record.size);
    }

    #[tokio::test]
    async fn test_versioning_retains_and_promotes() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();
        svc.set_versioning("docs", true).unwrap();

        let first = put(&svc, "docs", "v.txt", b"one").await;
        // Distinct last-modified seconds keep version ordering unambiguous
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let second = put(&svc, "docs", "v.txt", b"two").await;
        assert_eq!(body(&svc, "docs", "v.txt").await, b"two");

        // The superseded version stays readable by id
        let mut old = svc
            .get_object(
                "docs",
                "v.txt",
                GetObjectOptions {
                    version_id: Some(first.version_id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let mut buf = Vec::new();
        old.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"one");

        // Plain delete publishes a marker; the key reads as absent
        svc.delete_object("docs", "v.txt", DeleteObjectOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            svc.get_object("docs", "v.txt", GetObjectOptions::default())
                .await
                .unwrap_err(),
            Error::NoSuchKey { .. }
        ));
        assert_eq!(svc.bucket_stats("docs").unwrap().object_count, 0);

        // Deleting the marker version promotes the newest retained version
        let marker_version = {
            let versions = svc.list_object_versions("docs", "v.txt").unwrap();
            assert_eq!(versions.len(), 2); // "one" and "two"
            let latest = svc.meta().get_object("docs", "v.txt").unwrap().unwrap();
            assert!(latest.is_delete_marker);
            latest.version_id
        };
        svc.delete_object(
            "docs",
            "v.txt",
            DeleteObjectOptions {
                version_id: Some(marker_version),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(body(&svc, "docs", "v.txt").await, b"two");
        let _ = second;
    }

    #[tokio::test]
    async fn test_retention_denies_mutation() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();
        put(&svc, "docs", "held", b"keep me").await;

        svc.set_retention(
            "docs",
            "held",
            &RetentionRecord {
                mode: RetentionMode::Compliance,
                retain_until: now_secs() + 3600,
            },
        )
        .unwrap();

        let mut reader: &[u8] = b"overwrite";
        assert!(matches!(
            svc.put_object("docs", "held", &mut reader, 9, PutObjectOptions::default())
                .await
                .unwrap_err(),
            Error::PreconditionFailed(_)
        ));
        assert!(matches!(
            svc.delete_object("docs", "held", DeleteObjectOptions::default())
                .await
                .unwrap_err(),
            Error::PreconditionFailed(_)
        ));
        assert_eq!(body(&svc, "docs", "held").await, b"keep me");

        // Governance-mode retention can be bypassed; legal hold cannot
        svc.set_retention(
            "docs",
            "held",
            &RetentionRecord {
                mode: RetentionMode::Governance,
                retain_until: now_secs() + 3600,
            },
        )
        .unwrap();
        svc.set_legal_hold("docs", "held", true).unwrap();
        assert!(matches!(
            svc.delete_object(
                "docs",
                "held",
                DeleteObjectOptions {
                    bypass_governance: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err(),
            Error::PreconditionFailed(_)
        ));
        svc.set_legal_hold("docs", "held", false).unwrap();
        svc.delete_object(
            "docs",
            "held",
            DeleteObjectOptions {
                bypass_governance: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_head_and_range_reads() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();
        put(&svc, "docs", "r", b"0123456789").await;

        let head = svc.head_object("docs", "r", None).await.unwrap();
        assert_eq!(head.size, 10);

        let mut get = svc
            .get_object(
                "docs",
                "r",
                GetObjectOptions {
                    range: Some((2, 5)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let mut buf = Vec::new();
        get.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"234");
        assert_eq!(get.content_length, 3);
    }

    #[tokio::test]
    async fn test_bucket_config_blobs() {
        let (_dir, svc) = service().await;
        svc.create_bucket("docs").await.unwrap();

        svc.put_bucket_config("policy", "docs", br#"{"Version":"2012-10-17"}"#)
            .unwrap();
        assert!(svc.get_bucket_config("policy", "docs").unwrap().is_some());

        svc.upsert_lifecycle_rule(
            "docs",
            LifecycleRule {
                id: "expire".into(),
                prefix: "tmp/".into(),
                enabled: true,
                expiration_days: Some(7),
                abort_incomplete_multipart_days: None,
            },
        )
        .unwrap();
        assert_eq!(svc.get_lifecycle("docs").unwrap().rules.len(), 1);

        svc.delete_bucket("docs").await.unwrap();
        assert!(matches!(
            svc.get_bucket_config("policy", "docs").unwrap_err(),
            Error::NoSuchBucket(_)
        ));
    }
}
