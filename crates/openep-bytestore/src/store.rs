//! Filesystem byte store
//!
//! Layout: `<root>/buckets/<bucket>/<escaped-key>`. Writes stream into a
//! `%tmp-*` file in the bucket root, fsync, then rename into place; the
//! `%tmp-` prefix can never be produced by key escaping, so in-flight
//! writes are invisible to listings.

use crate::escape::{escape_key, unescape_key};
use openep_common::{BucketName, Error, Result};
use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Byte-range and read options for [`ByteStore::get`]
#[derive(Clone, Copy, Debug, Default)]
pub struct GetOptions {
    /// Optional byte range `[start, end)`; `end` is clamped to the object size
    pub range: Option<(u64, u64)>,
}

/// Options for [`ByteStore::list`]
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Only keys starting with this prefix are returned
    pub prefix: String,
    /// Keys lexicographically ≤ the marker are skipped
    pub marker: String,
    /// When non-empty, keys sharing a post-prefix delimiter are rolled up
    /// into common prefixes
    pub delimiter: String,
    /// Maximum number of keys + common prefixes to return
    pub max_keys: usize,
}

impl ListOptions {
    /// Options selecting everything under a prefix
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            max_keys: 1000,
            ..Self::default()
        }
    }
}

/// A stored object as seen by the byte store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Decoded object key
    pub key: String,
    /// Payload size in bytes
    pub size: u64,
    /// Filesystem modification time
    pub last_modified: SystemTime,
    /// Weak locator identifier derived from key and size
    pub etag: String,
}

/// Result of a list operation
#[derive(Clone, Debug, Default)]
pub struct ListResult {
    /// Matching objects, lexicographically sorted by key
    pub objects: Vec<StoredObject>,
    /// Rolled-up common prefixes, sorted, each emitted exactly once
    pub common_prefixes: Vec<String>,
    /// Whether a further entry exists beyond this page
    pub is_truncated: bool,
    /// Marker to resume from when truncated
    pub next_marker: Option<String>,
}

/// Durable bucket/key byte storage on the local filesystem
pub struct ByteStore {
    root: PathBuf,
    // Serializes bucket directory create/delete against object operations
    dir_lock: RwLock<()>,
}

impl ByteStore {
    /// Open a byte store rooted at `<root>/buckets`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into().join("buckets");
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            dir_lock: RwLock::new(()),
        })
    }

    fn bucket_path(&self, bucket: &BucketName) -> PathBuf {
        self.root.join(bucket.as_str())
    }

    fn object_path(&self, bucket: &BucketName, key: &str) -> PathBuf {
        let mut path = self.bucket_path(bucket);
        for component in escape_key(key).split('/') {
            path.push(component);
        }
        path
    }

    /// Create a bucket directory
    pub async fn create_bucket(&self, bucket: &BucketName) -> Result<()> {
        let _guard = self.dir_lock.write().await;
        let path = self.bucket_path(bucket);
        if fs::try_exists(&path).await? {
            return Err(Error::BucketAlreadyExists(bucket.to_string()));
        }
        fs::create_dir_all(&path).await?;
        debug!(bucket = %bucket, "created bucket directory");
        Ok(())
    }

    /// Delete a bucket directory; refuses when any object remains
    pub async fn delete_bucket(&self, bucket: &BucketName) -> Result<()> {
        let _guard = self.dir_lock.write().await;
        let path = self.bucket_path(bucket);
        if !fs::try_exists(&path).await? {
            return Err(Error::NoSuchBucket(bucket.to_string()));
        }
        let mut entries = fs::read_dir(&path).await?;
        if entries.next_entry().await?.is_some() {
            return Err(Error::BucketNotEmpty(bucket.to_string()));
        }
        fs::remove_dir(&path).await?;
        Ok(())
    }

    /// Whether the bucket directory exists
    pub async fn bucket_exists(&self, bucket: &BucketName) -> Result<bool> {
        Ok(fs::try_exists(self.bucket_path(bucket)).await?)
    }

    /// List bucket directory names, sorted
    pub async fn list_buckets(&self) -> Result<Vec<String>> {
        let _guard = self.dir_lock.read().await;
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Stream bytes into (bucket, key) atomically
    ///
    /// Writes to a temporary name in the bucket root, fsyncs, then renames
    /// over the final path. Returns the number of bytes written. When
    /// `declared_size > 0` and the stream length differs, the temp file is
    /// removed and `SizeMismatch` is returned.
    pub async fn put<R>(&self, bucket: &BucketName, key: &str, reader: &mut R, declared_size: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let _guard = self.dir_lock.read().await;
        let bucket_path = self.bucket_path(bucket);
        if !fs::try_exists(&bucket_path).await? {
            return Err(Error::NoSuchBucket(bucket.to_string()));
        }

        let final_path = self.object_path(bucket, key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = bucket_path.join(format!("%tmp-{}", Uuid::new_v4()));
        let written = match self.copy_to_tmp(&tmp_path, reader).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        if declared_size > 0 && written != declared_size {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::SizeMismatch {
                expected: declared_size,
                actual: written,
            });
        }

        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        Ok(written)
    }

    async fn copy_to_tmp<R>(&self, tmp_path: &Path, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let file = fs::File::create(tmp_path).await?;
        let mut writer = BufWriter::new(file);
        let written = tokio::io::copy(reader, &mut writer).await?;
        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        Ok(written)
    }

    /// Concatenate existing objects into a new object atomically
    ///
    /// Streams each source in order into a temporary file, fsyncs, then
    /// renames over the destination. Any failure removes the temp file and
    /// leaves a pre-existing destination untouched.
    pub async fn put_concat(
        &self,
        bucket: &BucketName,
        key: &str,
        source_keys: &[String],
    ) -> Result<u64> {
        let _guard = self.dir_lock.read().await;
        let bucket_path = self.bucket_path(bucket);
        if !fs::try_exists(&bucket_path).await? {
            return Err(Error::NoSuchBucket(bucket.to_string()));
        }

        let final_path = self.object_path(bucket, key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = bucket_path.join(format!("%tmp-{}", Uuid::new_v4()));
        let result = self.concat_to_tmp(bucket, &tmp_path, source_keys).await;
        match result {
            Ok(written) => {
                if let Err(e) = fs::rename(&tmp_path, &final_path).await {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(e.into());
                }
                Ok(written)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(e)
            }
        }
    }

    async fn concat_to_tmp(
        &self,
        bucket: &BucketName,
        tmp_path: &Path,
        source_keys: &[String],
    ) -> Result<u64> {
        let file = fs::File::create(tmp_path).await?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;
        for source in source_keys {
            let path = self.object_path(bucket, source);
            let mut reader = match fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::no_such_key(bucket.as_str(), source));
                }
                Err(e) => return Err(e.into()),
            };
            written += tokio::io::copy(&mut reader, &mut writer).await?;
        }
        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        Ok(written)
    }

    /// Open (bucket, key) for reading
    ///
    /// Returns the reader and the number of bytes it will yield. The caller
    /// owns closing the stream (dropping it).
    pub async fn get(
        &self,
        bucket: &BucketName,
        key: &str,
        options: GetOptions,
    ) -> Result<(Box<dyn AsyncRead + Send + Unpin>, u64)> {
        let _guard = self.dir_lock.read().await;
        let path = self.object_path(bucket, key);
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::no_such_key(bucket.as_str(), key));
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();

        match options.range {
            None => Ok((Box::new(file), len)),
            Some((start, end)) => {
                let end = end.min(len);
                if start > end {
                    return Err(Error::invalid_argument(format!(
                        "invalid range: {start}..{end}"
                    )));
                }
                file.seek(SeekFrom::Start(start)).await?;
                let take = end - start;
                Ok((Box::new(file.take(take)), take))
            }
        }
    }

    /// Metadata-only read of (bucket, key)
    pub async fn head(&self, bucket: &BucketName, key: &str) -> Result<StoredObject> {
        let _guard = self.dir_lock.read().await;
        let path = self.object_path(bucket, key);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::no_such_key(bucket.as_str(), key));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(stored_object(key.to_string(), &meta))
    }

    /// Remove (bucket, key); idempotent
    ///
    /// After removal, empty parent directories are pruned up to (but not
    /// including) the bucket root.
    pub async fn delete(&self, bucket: &BucketName, key: &str) -> Result<()> {
        let _guard = self.dir_lock.read().await;
        let path = self.object_path(bucket, key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let bucket_path = self.bucket_path(bucket);
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == bucket_path {
                break;
            }
            // Stop pruning at the first non-empty or already-removed directory
            match fs::read_dir(&current).await {
                Ok(mut entries) => {
                    if entries.next_entry().await?.is_some() {
                        break;
                    }
                }
                Err(_) => break,
            }
            if fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    /// List objects under a bucket
    ///
    /// Depth-first traversal, decoded keys sorted lexicographically, then
    /// filtered by prefix and marker and rolled up by delimiter. Truncation
    /// is reported only when a further entry actually exists.
    pub async fn list(&self, bucket: &BucketName, options: &ListOptions) -> Result<ListResult> {
        let _guard = self.dir_lock.read().await;
        let bucket_path = self.bucket_path(bucket);
        if !fs::try_exists(&bucket_path).await? {
            return Err(Error::NoSuchBucket(bucket.to_string()));
        }

        let mut keys = self.walk(&bucket_path).await?;
        keys.sort_by(|a, b| a.key.cmp(&b.key));

        let mut result = ListResult::default();
        if options.max_keys == 0 {
            return Ok(result);
        }

        let mut seen_prefixes: BTreeSet<String> = BTreeSet::new();
        let mut emitted = 0usize;
        let mut last_emitted: Option<String> = None;

        for object in keys {
            if !object.key.starts_with(&options.prefix) {
                continue;
            }
            if !options.marker.is_empty() && object.key.as_str() <= options.marker.as_str() {
                continue;
            }

            let remainder = &object.key[options.prefix.len()..];
            if !options.delimiter.is_empty() {
                if let Some(i) = remainder.find(&options.delimiter) {
                    let common =
                        object.key[..options.prefix.len() + i + options.delimiter.len()].to_string();
                    if seen_prefixes.contains(&common) {
                        continue;
                    }
                    if emitted == options.max_keys {
                        result.is_truncated = true;
                        break;
                    }
                    seen_prefixes.insert(common.clone());
                    last_emitted = Some(common.clone());
                    result.common_prefixes.push(common);
                    emitted += 1;
                    continue;
                }
            }

            if emitted == options.max_keys {
                result.is_truncated = true;
                break;
            }
            last_emitted = Some(object.key.clone());
            result.objects.push(object);
            emitted += 1;
        }

        if result.is_truncated {
            result.next_marker = last_emitted;
        }
        Ok(result)
    }

    async fn walk(&self, bucket_path: &Path) -> Result<Vec<StoredObject>> {
        let mut stack = vec![bucket_path.to_path_buf()];
        let mut out = Vec::new();

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // A concurrent delete pruned this directory under us
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    let rel = path
                        .strip_prefix(bucket_path)
                        .map_err(|e| Error::internal(e.to_string()))?;
                    let rel = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    match unescape_key(&rel) {
                        Ok(key) => {
                            let meta = entry.metadata().await?;
                            out.push(stored_object(key, &meta));
                        }
                        // In-flight temp file or foreign entry
                        Err(_) => {
                            debug!(entry = %rel, "skipping undecodable entry");
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn stored_object(key: String, meta: &std::fs::Metadata) -> StoredObject {
    let last_modified = meta.modified().unwrap_or_else(|e| {
        warn!("filesystem does not report mtime: {e}");
        SystemTime::UNIX_EPOCH
    });
    let etag = format!("{:08x}-{:x}", crc32c::crc32c(key.as_bytes()), meta.len());
    StoredObject {
        key,
        size: meta.len(),
        last_modified,
        etag,
    }
}
