//! Multipart uploads
//!
//! An upload is a record plus a set of part records; each part's bytes
//! live in the byte store under a NUL-composite shard key. Parts may
//! arrive and be overwritten in any order. Completion takes the
//! destination write lock, concatenates the shards through the byte
//! store's temp-and-rename path, publishes the composed object, then
//! removes the shards and the upload record. A failure anywhere before
//! the rename leaves the previous object and the upload intact; abort
//! removes everything and is idempotent.

use crate::service::{now_secs, part_store_key, versioned_store_key, HashingReader, ObjectService};
use openep_common::checksum::{composite_etag, format_etag};
use openep_common::{Error, ObjectKey, Result, UploadId, VersionId};
use openep_meta::{MultipartRecord, ObjectRecord, PartRecord};
use std::collections::BTreeMap;
use tokio::io::AsyncRead;
use tracing::warn;

/// Highest part number accepted
pub const MAX_PART_NUMBER: u32 = 10_000;

/// A part reference supplied to completion: the number plus the ETag the
/// client observed when uploading it (checked when present)
#[derive(Clone, Debug)]
pub struct CompletePart {
    /// Part number
    pub part_number: u32,
    /// Expected ETag, when the caller supplies one
    pub etag: Option<String>,
}

/// Result of a completed multipart upload
#[derive(Clone, Debug)]
pub struct CompleteMultipartResult {
    /// Composite ETag of the composed object
    pub etag: String,
    /// Total size of the composed object
    pub size: u64,
    /// Version identifier of the destination write
    pub version_id: String,
    /// Last-modified time of the destination
    pub last_modified: u64,
}

impl ObjectService {
    /// Begin a multipart upload, returning its fresh identifier
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        user_metadata: BTreeMap<String, String>,
    ) -> Result<MultipartRecord> {
        ObjectKey::new(key)?;
        self.head_bucket(bucket)?;

        let record = MultipartRecord {
            upload_id: UploadId::new().to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            initiated_at: now_secs(),
            content_type,
            user_metadata,
        };
        self.meta().put_multipart(&record)?;
        Ok(record)
    }

    /// Upload (or overwrite) one part of a pending upload
    pub async fn upload_part<R>(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        reader: &mut R,
        declared_size: u64,
    ) -> Result<PartRecord>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if part_number < 1 || part_number > MAX_PART_NUMBER {
            return Err(Error::invalid_argument(format!(
                "part number must be in 1..={MAX_PART_NUMBER}, got {part_number}"
            )));
        }
        let name = self.require_upload(bucket, key, upload_id)?;

        let store_key = part_store_key(key, upload_id, part_number);
        let mut hashing = HashingReader::new(reader);
        self.bytes()
            .put(&name, &store_key, &mut hashing, declared_size)
            .await?;
        let (digest, size) = hashing.finalize();

        let record = PartRecord {
            part_number,
            etag: format_etag(&digest),
            digest,
            size,
            last_modified: now_secs(),
            store_key,
        };
        if let Err(e) = self.meta().put_part(bucket, key, upload_id, &record) {
            let _ = self.bytes().delete(&name, &record.store_key).await;
            return Err(e);
        }
        Ok(record)
    }

    /// Complete an upload from an ordered part list
    ///
    /// Parts are ordered by ascending part number (gaps are legal), each
    /// referenced part must exist, and the shards are concatenated into
    /// the destination atomically. Success removes the part shards and
    /// the upload record; any earlier failure leaves the upload in place.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletePart>,
    ) -> Result<CompleteMultipartResult> {
        let _guard = self.locks().write(bucket, key).await;
        let name = self.require_upload(bucket, key, upload_id)?;
        let upload = self
            .meta()
            .get_multipart(bucket, key, upload_id)?
            .ok_or_else(|| Error::NoSuchUpload(upload_id.to_string()))?;
        validate_part_list(&parts)?;

        let mut ordered = parts;
        ordered.sort_by_key(|p| p.part_number);

        let mut records = Vec::with_capacity(ordered.len());
        for requested in &ordered {
            let record = self
                .meta()
                .get_part(bucket, key, upload_id, requested.part_number)?
                .ok_or(Error::InvalidPart(requested.part_number))?;
            if let Some(expected) = &requested.etag {
                if *expected != record.etag {
                    return Err(Error::InvalidPart(requested.part_number));
                }
            }
            records.push(record);
        }

        let size: u64 = records.iter().map(|r| r.size).sum();
        let digests: Vec<[u8; 32]> = records.iter().map(|r| r.digest).collect();
        let etag = composite_etag(&digests);

        self.check_destination_mutable(bucket, key)?;
        let versioned = self.meta().versioning_enabled(bucket)?;
        let version_id = VersionId::new().to_string();
        let store_key = if versioned {
            versioned_store_key(key, &version_id)
        } else {
            key.to_string()
        };

        // Concatenate through temp-and-rename; a failure here leaves any
        // previous object untouched and the upload still pending
        let source_keys: Vec<String> = records.iter().map(|r| r.store_key.clone()).collect();
        let written = self.bytes().put_concat(&name, &store_key, &source_keys).await?;
        if written != size {
            let _ = self.bytes().delete(&name, &store_key).await;
            return Err(Error::SizeMismatch {
                expected: size,
                actual: written,
            });
        }

        let last_modified = now_secs();
        let record = ObjectRecord {
            key: key.to_string(),
            size,
            etag: etag.clone(),
            content_type: upload.content_type.clone(),
            content_encoding: None,
            cache_control: None,
            user_metadata: upload.user_metadata.clone(),
            storage_class: "STANDARD".to_string(),
            version_id: version_id.clone(),
            is_latest: true,
            is_delete_marker: false,
            last_modified,
            store_key,
            parts: Some(
                records
                    .iter()
                    .map(|r| openep_meta::CompletedPartRecord {
                        part_number: r.part_number,
                        etag: r.etag.clone(),
                        size: r.size,
                    })
                    .collect(),
            ),
        };
        self.publish_object(bucket, &name, record, versioned).await?;

        // Committed: the upload record and part shards go away
        for part in self.meta().drain_parts(bucket, key, upload_id)? {
            if let Err(e) = self.bytes().delete(&name, &part.store_key).await {
                warn!(bucket, key, part = part.part_number, error = %e, "failed to remove part shard");
            }
        }
        self.meta().delete_multipart(bucket, key, upload_id)?;

        Ok(CompleteMultipartResult {
            etag,
            size,
            version_id,
            last_modified,
        })
    }

    /// Abort an upload, removing every part shard and the upload record;
    /// repeating the abort is a no-op
    pub async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.head_bucket(bucket)?;
        let name = openep_common::BucketName::new_unchecked(bucket);

        if self.meta().get_multipart(bucket, key, upload_id)?.is_none() {
            return Ok(());
        }
        for part in self.meta().drain_parts(bucket, key, upload_id)? {
            if let Err(e) = self.bytes().delete(&name, &part.store_key).await {
                warn!(bucket, key, part = part.part_number, error = %e, "failed to remove part shard");
            }
        }
        self.meta().delete_multipart(bucket, key, upload_id)?;
        Ok(())
    }

    /// Parts uploaded so far, ascending by part number; empty once the
    /// upload is completed or aborted
    pub fn list_parts(&self, bucket: &str, key: &str, upload_id: &str) -> Result<Vec<PartRecord>> {
        self.head_bucket(bucket)?;
        self.meta().list_parts(bucket, key, upload_id)
    }

    /// Pending uploads in a bucket, ordered by key then upload id
    pub fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<MultipartRecord>> {
        self.head_bucket(bucket)?;
        self.meta().list_multiparts(bucket)
    }

    fn require_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<openep_common::BucketName> {
        self.head_bucket(bucket)?;
        if self.meta().get_multipart(bucket, key, upload_id)?.is_none() {
            return Err(Error::NoSuchUpload(upload_id.to_string()));
        }
        Ok(openep_common::BucketName::new_unchecked(bucket))
    }

    fn check_destination_mutable(&self, bucket: &str, key: &str) -> Result<()> {
        // Same retention rules as a direct overwrite of the key
        if let Some(retention) = self.meta().get_retention(bucket, key)? {
            if retention.in_effect(now_secs()) {
                return Err(Error::PreconditionFailed(format!(
                    "object {bucket}/{key} is under retention"
                )));
            }
        }
        if self.meta().legal_hold_enabled(bucket, key)? {
            return Err(Error::PreconditionFailed(format!(
                "object {bucket}/{key} is under legal hold"
            )));
        }
        Ok(())
    }
}

fn validate_part_list(parts: &[CompletePart]) -> Result<()> {
    if parts.is_empty() {
        return Err(Error::invalid_argument("part list cannot be empty"));
    }
    let mut numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
    numbers.sort_unstable();
    if numbers.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::invalid_argument("duplicate part numbers"));
    }
    Ok(())
}
