//! OpenEndpoint erasure coder
//!
//! Reed-Solomon k+m coding over equal-sized shards. The input is split
//! into k data shards (zero-padded to a SIMD-friendly multiple of 64
//! bytes), m parity shards are computed, and any k of the k+m shards
//! reconstruct the original bytes. The original length is carried as
//! object metadata by the caller; it is not encoded into the shards.

pub mod codec;

pub use codec::{ErasureCoder, ErasureProfile};
