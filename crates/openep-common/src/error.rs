//! Error types for OpenEndpoint
//!
//! One workspace-wide error enum. Each variant carries enough context for
//! the HTTP adapter to map it onto a stable S3 error code and status hint.

use crate::types::{BucketNameError, ObjectKeyError};
use thiserror::Error;

/// Common result type for OpenEndpoint operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for OpenEndpoint
#[derive(Debug, Error)]
pub enum Error {
    // Bucket / object namespace errors
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("no such key: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(#[from] BucketNameError),

    #[error("invalid object name: {0}")]
    InvalidObjectName(#[from] ObjectKeyError),

    #[error("invalid part: {0}")]
    InvalidPart(u32),

    // Request errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("access denied")]
    AccessDenied,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("rate limited")]
    RateLimited,

    // Storage errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Cluster errors
    #[error("write quorum not reached: {acks} of {required} acknowledgements")]
    QuorumNotReached { acks: usize, required: usize },

    #[error("insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a no-such-key error
    pub fn no_such_key(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NoSuchKey {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Check if this is a not-found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchBucket(_)
                | Self::NoSuchKey { .. }
                | Self::NoSuchUpload(_)
                | Self::NodeNotFound(_)
        )
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed(_) | Self::QuorumNotReached { .. }
        )
    }

    /// Get the stable S3 error code for this error
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket(_) => "NoSuchBucket",
            Self::NoSuchKey { .. } => "NoSuchKey",
            Self::NoSuchUpload(_) => "NoSuchUpload",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::InvalidObjectName(_) => "InvalidObjectName",
            Self::InvalidPart(_) => "InvalidPart",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::PreconditionFailed(_) => "PreconditionFailed",
            Self::MalformedRequest(_) => "MalformedRequest",
            Self::SizeMismatch { .. } => "IncompleteBody",
            Self::AccessDenied => "AccessDenied",
            Self::SignatureMismatch => "SignatureDoesNotMatch",
            Self::RateLimited => "SlowDown",
            Self::Io(_) => "InternalError",
            Self::Serialization(_) => "InternalError",
            Self::QuorumNotReached { .. } => "ServiceUnavailable",
            Self::InsufficientShards { .. } => "ServiceUnavailable",
            Self::NodeNotFound(_) => "ServiceUnavailable",
            Self::Timeout => "ServiceUnavailable",
            Self::ConnectionFailed(_) => "ServiceUnavailable",
            Self::Internal(_) => "InternalError",
            Self::NotImplemented(_) => "NotImplemented",
        }
    }

    /// Get the HTTP status hint for the adapter
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidBucketName(_)
            | Self::InvalidObjectName(_)
            | Self::InvalidPart(_)
            | Self::InvalidArgument(_)
            | Self::MalformedRequest(_) => 400,

            // 403 Forbidden
            Self::AccessDenied | Self::SignatureMismatch => 403,

            // 404 Not Found
            Self::NoSuchBucket(_) | Self::NoSuchKey { .. } | Self::NoSuchUpload(_) => 404,

            // 409 Conflict
            Self::BucketNotEmpty(_) | Self::BucketAlreadyExists(_) => 409,

            // 411 Length Required
            Self::SizeMismatch { .. } => 411,

            // 412 Precondition Failed
            Self::PreconditionFailed(_) => 412,

            // 429 (adapter maps SlowDown to 503 for S3 compatibility)
            Self::RateLimited => 503,

            // 500 Internal Server Error
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => 500,

            // 501 Not Implemented
            Self::NotImplemented(_) => 501,

            // 503 Service Unavailable
            Self::QuorumNotReached { .. }
            | Self::InsufficientShards { .. }
            | Self::NodeNotFound(_)
            | Self::Timeout
            | Self::ConnectionFailed(_) => 503,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NoSuchBucket("b".into()).code(), "NoSuchBucket");
        assert_eq!(Error::no_such_key("b", "k").code(), "NoSuchKey");
        assert_eq!(Error::BucketNotEmpty("b".into()).code(), "BucketNotEmpty");
        assert_eq!(
            Error::SizeMismatch {
                expected: 5,
                actual: 3
            }
            .code(),
            "IncompleteBody"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(Error::AccessDenied.http_status(), 403);
        assert_eq!(Error::no_such_key("b", "k").http_status(), 404);
        assert_eq!(Error::BucketAlreadyExists("b".into()).http_status(), 409);
        assert_eq!(Error::PreconditionFailed("held".into()).http_status(), 412);
        assert_eq!(Error::internal("x").http_status(), 500);
        assert_eq!(Error::Timeout.http_status(), 503);
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::NoSuchBucket("b".into()).is_not_found());
        assert!(Error::NoSuchUpload("u".into()).is_not_found());
        assert!(!Error::AccessDenied.is_not_found());
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(
            Error::QuorumNotReached {
                acks: 1,
                required: 2
            }
            .is_retryable()
        );
        assert!(!Error::AccessDenied.is_retryable());
    }
}
