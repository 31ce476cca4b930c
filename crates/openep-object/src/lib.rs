//! OpenEndpoint object service
//!
//! Composes the byte store, the metadata store and the per-key lock
//! registry into the full logical object API: bucket CRUD, object
//! put/get/copy/delete/head/list with versioning and retention
//! enforcement, and the multipart-upload state machine.
//!
//! Within a single (bucket, key), all operations serialize through the
//! lock registry; across keys there is no ordering guarantee. Multipart
//! completion is the serialization point that publishes parts atomically.

pub mod lifecycle;
pub mod locks;
pub mod multipart;
pub mod service;

pub use lifecycle::{LifecycleSweeper, SweepReport};
pub use locks::LockRegistry;
pub use multipart::{CompleteMultipartResult, CompletePart, MAX_PART_NUMBER};
pub use service::{
    CopyObjectResult, DeleteObjectOptions, GetObjectOptions, GetObjectResult, ListObjectsOptions,
    ListObjectsResult, ObjectService, PutObjectOptions, PutObjectResult,
};
