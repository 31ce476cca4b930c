//! Metadata key layout
//!
//! Every entity lives under a namespace prefix. Object-scoped keys embed
//! the object key verbatim (keys cannot contain NUL, which is reserved as
//! the composite separator for version-scoped entries). Part numbers are
//! zero-padded so that ranged iteration yields them in ascending order.

/// `bucket:{bucket}`
#[must_use]
pub fn bucket(bucket: &str) -> String {
    format!("bucket:{bucket}")
}

/// Prefix selecting every bucket record
pub const BUCKET_PREFIX: &str = "bucket:";

/// `object:{bucket}/{key}`
#[must_use]
pub fn object(bucket: &str, key: &str) -> String {
    format!("object:{bucket}/{key}")
}

/// Prefix selecting every object record in a bucket
#[must_use]
pub fn object_prefix(bucket: &str) -> String {
    format!("object:{bucket}/")
}

/// `objectversion:{bucket}/{key}\0{version}`
#[must_use]
pub fn object_version(bucket: &str, key: &str, version: &str) -> String {
    format!("objectversion:{bucket}/{key}\0{version}")
}

/// Prefix selecting every retained version of one object
#[must_use]
pub fn object_version_prefix(bucket: &str, key: &str) -> String {
    format!("objectversion:{bucket}/{key}\0")
}

/// `multipart:{bucket}/{key}/{upload_id}`
#[must_use]
pub fn multipart(bucket: &str, key: &str, upload_id: &str) -> String {
    format!("multipart:{bucket}/{key}/{upload_id}")
}

/// Prefix selecting every pending upload in a bucket
#[must_use]
pub fn multipart_prefix(bucket: &str) -> String {
    format!("multipart:{bucket}/")
}

/// `part:{bucket}/{key}/{upload_id}/{part_number:05}`
#[must_use]
pub fn part(bucket: &str, key: &str, upload_id: &str, part_number: u32) -> String {
    format!("part:{bucket}/{key}/{upload_id}/{part_number:05}")
}

/// Prefix selecting every part of one upload, in part-number order
#[must_use]
pub fn part_prefix(bucket: &str, key: &str, upload_id: &str) -> String {
    format!("part:{bucket}/{key}/{upload_id}/")
}

/// `retention:{bucket}:{key}`
#[must_use]
pub fn retention(bucket: &str, key: &str) -> String {
    format!("retention:{bucket}:{key}")
}

/// `legalhold:{bucket}:{key}`
#[must_use]
pub fn legal_hold(bucket: &str, key: &str) -> String {
    format!("legalhold:{bucket}:{key}")
}

/// `bucketstats:{bucket}`
#[must_use]
pub fn bucket_stats(bucket: &str) -> String {
    format!("bucketstats:{bucket}")
}

/// `versioning:{bucket}`
#[must_use]
pub fn versioning(bucket: &str) -> String {
    format!("versioning:{bucket}")
}

/// `lifecycle:{bucket}`
#[must_use]
pub fn lifecycle(bucket: &str) -> String {
    format!("lifecycle:{bucket}")
}

/// Bucket-scoped opaque configuration namespaces (spec-fixed tag set)
pub const BUCKET_CONFIG_NAMESPACES: &[&str] = &[
    "lifecycle",
    "versioning",
    "replication",
    "cors",
    "policy",
    "encryption",
    "tags",
    "objectlock",
    "publicaccessblock",
    "accelerate",
    "website",
    "notification",
    "logging",
    "location",
    "ownership",
];

/// Bucket-and-id-scoped opaque configuration namespaces
pub const BUCKET_ID_CONFIG_NAMESPACES: &[&str] = &["inventory", "analytics", "metrics"];

/// `{namespace}:{bucket}` for an opaque bucket configuration
#[must_use]
pub fn bucket_config(namespace: &str, bucket: &str) -> String {
    format!("{namespace}:{bucket}")
}

/// `{namespace}:{bucket}/{id}` for a keyed opaque bucket configuration
#[must_use]
pub fn bucket_id_config(namespace: &str, bucket: &str, id: &str) -> String {
    format!("{namespace}:{bucket}/{id}")
}

/// Prefix selecting every keyed configuration of one namespace in a bucket
#[must_use]
pub fn bucket_id_config_prefix(namespace: &str, bucket: &str) -> String {
    format!("{namespace}:{bucket}/")
}

/// `presigned:{url}`
#[must_use]
pub fn presigned(url: &str) -> String {
    format!("presigned:{url}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_keys_sort_numerically() {
        let upload = "u-1";
        let p1 = part("b", "k", upload, 1);
        let p2 = part("b", "k", upload, 2);
        let p10 = part("b", "k", upload, 10);
        let p100 = part("b", "k", upload, 100);
        assert!(p1 < p2);
        assert!(p2 < p10);
        assert!(p10 < p100);
        assert!(p100.starts_with(&part_prefix("b", "k", upload)));
    }

    #[test]
    fn test_namespaces_disjoint() {
        assert!(object("b", "k").starts_with(&object_prefix("b")));
        assert!(!object("b", "k").starts_with("objectversion:"));
        assert!(object_version("b", "k", "v").starts_with(&object_version_prefix("b", "k")));
    }
}
