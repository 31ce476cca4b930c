//! OpenEndpoint byte store
//!
//! Durable, crash-consistent storage of opaque byte streams keyed by
//! (bucket, key) on the local filesystem. Every mutating operation writes
//! through a temporary name, fsyncs, and renames, so partial writes are
//! never observable. Object keys are escaped per path component so that no
//! key text can resolve outside its bucket root.

pub mod escape;
pub mod store;

pub use escape::{escape_key, unescape_key};
pub use store::{ByteStore, GetOptions, ListOptions, ListResult, StoredObject};
