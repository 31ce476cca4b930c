//! Common types and utilities for OpenEndpoint
//!
//! This crate defines the identifier newtypes, the error taxonomy, the
//! configuration surface and the checksum helpers shared by every other
//! crate in the workspace.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

// Re-exports
pub use checksum::{EtagHasher, composite_etag, format_etag, quoted_sha256_hex};
pub use config::{
    AuthConfig, ClusterConfig, Config, MetricsConfig, RebalanceConfig, ServerConfig, StorageConfig,
};
pub use error::{Error, Result};
pub use types::{
    BucketName, BucketNameError, NodeId, NodeState, ObjectKey, ObjectKeyError, UploadId, VersionId,
};
