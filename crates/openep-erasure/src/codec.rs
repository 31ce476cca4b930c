//! Reed-Solomon encoder/decoder

use openep_common::{Error, Result};
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};
use serde::{Deserialize, Serialize};

// reed-solomon-simd needs even shard sizes; 64 keeps shards aligned for
// the wide SIMD paths and bounds the overhead for tiny objects.
const SHARD_ALIGN: usize = 64;

/// Erasure coding profile (k data shards + m parity shards)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureProfile {
    /// Number of data shards (k)
    pub data_shards: u8,
    /// Number of parity shards (m)
    pub parity_shards: u8,
}

impl ErasureProfile {
    /// Create a profile
    #[must_use]
    pub const fn new(data_shards: u8, parity_shards: u8) -> Self {
        Self {
            data_shards,
            parity_shards,
        }
    }

    /// Default 4+2 profile
    pub const EC_4_2: Self = Self::new(4, 2);

    /// 8+2 profile
    pub const EC_8_2: Self = Self::new(8, 2);

    /// 4+4 profile
    pub const EC_4_4: Self = Self::new(4, 4);

    /// Total number of shards (k + m)
    #[must_use]
    pub const fn total_shards(&self) -> usize {
        self.data_shards as usize + self.parity_shards as usize
    }

    /// Storage efficiency (k / (k + m))
    #[must_use]
    pub fn efficiency(&self) -> f64 {
        f64::from(self.data_shards) / self.total_shards() as f64
    }
}

impl Default for ErasureProfile {
    fn default() -> Self {
        Self::EC_4_2
    }
}

/// Reed-Solomon erasure coder
///
/// Placement-agnostic: the cluster layer decides which node holds which
/// shard position.
pub struct ErasureCoder {
    profile: ErasureProfile,
}

impl ErasureCoder {
    /// Create a coder for the given profile
    pub fn new(profile: ErasureProfile) -> Result<Self> {
        if profile.data_shards == 0 {
            return Err(Error::invalid_argument("data_shards must be > 0"));
        }
        if profile.parity_shards == 0 {
            return Err(Error::invalid_argument("parity_shards must be > 0"));
        }
        if profile.total_shards() > 255 {
            return Err(Error::invalid_argument("total shards must be <= 255"));
        }
        Ok(Self { profile })
    }

    /// The configured profile
    #[must_use]
    pub const fn profile(&self) -> ErasureProfile {
        self.profile
    }

    /// Number of data shards (k)
    #[must_use]
    pub const fn data_shards(&self) -> usize {
        self.profile.data_shards as usize
    }

    /// Number of parity shards (m)
    #[must_use]
    pub const fn parity_shards(&self) -> usize {
        self.profile.parity_shards as usize
    }

    /// Total number of shards (k + m)
    #[must_use]
    pub const fn total_shards(&self) -> usize {
        self.profile.total_shards()
    }

    fn shard_size_for(&self, len: usize) -> usize {
        let k = self.data_shards();
        len.div_ceil(k).max(1).next_multiple_of(SHARD_ALIGN)
    }

    /// Encode data into k data shards followed by m parity shards
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let k = self.data_shards();
        let m = self.parity_shards();
        let shard_size = self.shard_size_for(data.len());

        // Pad to k equal shards
        let mut padded = vec![0u8; shard_size * k];
        padded[..data.len()].copy_from_slice(data);

        let mut encoder = ReedSolomonEncoder::new(k, m, shard_size)
            .map_err(|e| Error::internal(format!("erasure encoder: {e}")))?;
        for i in 0..k {
            encoder
                .add_original_shard(&padded[i * shard_size..(i + 1) * shard_size])
                .map_err(|e| Error::internal(format!("erasure encode: {e}")))?;
        }
        let encoded = encoder
            .encode()
            .map_err(|e| Error::internal(format!("erasure encode: {e}")))?;

        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(k + m);
        for i in 0..k {
            shards.push(padded[i * shard_size..(i + 1) * shard_size].to_vec());
        }
        for parity in encoded.recovery_iter() {
            shards.push(parity.to_vec());
        }
        Ok(shards)
    }

    /// Decode shards back to the original bytes
    ///
    /// `shards` holds `k + m` entries with `None` for missing shards; at
    /// least k must be present. Missing data shards are reconstructed, the
    /// data shards are concatenated, and the result is trimmed to
    /// `original_len`.
    pub fn decode(&self, shards: &mut [Option<Vec<u8>>], original_len: usize) -> Result<Vec<u8>> {
        let k = self.data_shards();
        self.check_shard_slots(shards)?;

        // Fast path: every data shard survived
        if shards[..k].iter().all(Option::is_some) {
            let mut out = Vec::with_capacity(original_len);
            for shard in shards.iter().take(k).flatten() {
                out.extend_from_slice(shard);
            }
            out.truncate(original_len);
            return Ok(out);
        }

        self.reconstruct(shards)?;

        let mut out = Vec::with_capacity(original_len);
        for shard in shards.iter().take(k).flatten() {
            out.extend_from_slice(shard);
        }
        out.truncate(original_len);
        Ok(out)
    }

    /// Fill every missing shard entry in place
    ///
    /// Data shards come back from Reed-Solomon decoding; missing parity is
    /// regenerated by re-encoding the restored data.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        let k = self.data_shards();
        let m = self.parity_shards();
        let shard_size = self.check_shard_slots(shards)?;

        if shards.iter().all(Option::is_some) {
            return Ok(());
        }

        if shards[..k].iter().any(Option::is_none) {
            let mut decoder = ReedSolomonDecoder::new(k, m, shard_size)
                .map_err(|e| Error::internal(format!("erasure decoder: {e}")))?;
            for (i, shard) in shards.iter().enumerate().take(k) {
                if let Some(data) = shard {
                    decoder
                        .add_original_shard(i, data)
                        .map_err(|e| Error::internal(format!("erasure decode: {e}")))?;
                }
            }
            for i in 0..m {
                if let Some(data) = &shards[k + i] {
                    decoder
                        .add_recovery_shard(i, data)
                        .map_err(|e| Error::internal(format!("erasure decode: {e}")))?;
                }
            }
            let restored = decoder
                .decode()
                .map_err(|e| Error::internal(format!("erasure decode: {e}")))?;
            for i in 0..k {
                if shards[i].is_none() {
                    let shard = restored.restored_original(i).ok_or_else(|| {
                        Error::internal(format!("failed to restore data shard {i}"))
                    })?;
                    shards[i] = Some(shard.to_vec());
                }
            }
        }

        // Regenerate any missing parity from the (now complete) data shards
        if shards[k..].iter().any(Option::is_none) {
            let mut encoder = ReedSolomonEncoder::new(k, m, shard_size)
                .map_err(|e| Error::internal(format!("erasure encoder: {e}")))?;
            for shard in shards.iter().take(k).flatten() {
                encoder
                    .add_original_shard(shard)
                    .map_err(|e| Error::internal(format!("erasure encode: {e}")))?;
            }
            let encoded = encoder
                .encode()
                .map_err(|e| Error::internal(format!("erasure encode: {e}")))?;
            for (i, parity) in encoded.recovery_iter().enumerate() {
                if shards[k + i].is_none() {
                    shards[k + i] = Some(parity.to_vec());
                }
            }
        }

        Ok(())
    }

    /// Check parity consistency by re-encoding the data shards
    pub fn verify(&self, shards: &[Vec<u8>]) -> Result<bool> {
        let k = self.data_shards();
        let m = self.parity_shards();

        if shards.len() != k + m {
            return Ok(false);
        }
        let Some(shard_size) = shards.first().map(Vec::len) else {
            return Ok(false);
        };
        if !shards.iter().all(|s| s.len() == shard_size) {
            return Ok(false);
        }

        let mut encoder = ReedSolomonEncoder::new(k, m, shard_size)
            .map_err(|e| Error::internal(format!("erasure encoder: {e}")))?;
        for shard in &shards[..k] {
            encoder
                .add_original_shard(shard)
                .map_err(|e| Error::internal(format!("erasure encode: {e}")))?;
        }
        let encoded = encoder
            .encode()
            .map_err(|e| Error::internal(format!("erasure encode: {e}")))?;

        for (i, parity) in encoded.recovery_iter().enumerate() {
            if parity != shards[k + i].as_slice() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Validate slot count, presence and sizes; returns the shard size
    fn check_shard_slots(&self, shards: &[Option<Vec<u8>>]) -> Result<usize> {
        let total = self.total_shards();
        if shards.len() != total {
            return Err(Error::invalid_argument(format!(
                "expected {total} shard slots, got {}",
                shards.len()
            )));
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards() {
            return Err(Error::InsufficientShards {
                available,
                required: self.data_shards(),
            });
        }

        let shard_size = shards
            .iter()
            .flatten()
            .map(Vec::len)
            .next()
            .unwrap_or_default();
        if shards
            .iter()
            .flatten()
            .any(|shard| shard.len() != shard_size)
        {
            return Err(Error::invalid_argument("shard sizes differ"));
        }
        Ok(shard_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn coder(k: u8, m: u8) -> ErasureCoder {
        ErasureCoder::new(ErasureProfile::new(k, m)).unwrap()
    }

    #[test]
    fn test_encode_decode_all_present() {
        let coder = coder(4, 2);
        let data = b"Hello, World! This is a test of erasure coding.";

        let shards = coder.encode(data).unwrap();
        assert_eq!(shards.len(), 6);
        let shard_size = shards[0].len();
        assert!(shards.iter().all(|s| s.len() == shard_size));
        assert_eq!(shard_size % 64, 0);

        let mut slots: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        let decoded = coder.decode(&mut slots, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_with_losses_up_to_m() {
        for (k, m) in [(4u8, 2u8), (8, 2), (4, 4)] {
            let coder = coder(k, m);
            let mut data = vec![0u8; 10_000];
            rand::thread_rng().fill_bytes(&mut data);

            let shards = coder.encode(&data).unwrap();
            let mut slots: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
            // Drop m shards spread over data and parity
            for i in 0..m as usize {
                slots[i * 2] = None;
            }

            let decoded = coder.decode(&mut slots, data.len()).unwrap();
            assert_eq!(decoded, data, "profile {k}+{m}");
        }
    }

    #[test]
    fn test_fewer_than_k_fails() {
        let coder = coder(4, 2);
        let shards = coder.encode(b"payload").unwrap();
        let mut slots: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        slots[0] = None;
        slots[1] = None;
        slots[4] = None;

        let err = coder.decode(&mut slots, 7).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientShards {
                available: 3,
                required: 4
            }
        ));
    }

    #[test]
    fn test_reconstruct_fills_all_slots() {
        let coder = coder(4, 2);
        let data = b"reconstruct both a data shard and a parity shard";
        let shards = coder.encode(data).unwrap();

        let mut slots: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
        slots[1] = None; // data
        slots[5] = None; // parity

        coder.reconstruct(&mut slots).unwrap();
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.as_ref().unwrap(), &shards[i], "shard {i}");
        }
    }

    #[test]
    fn test_verify_detects_corruption() {
        let coder = coder(4, 2);
        let shards = coder.encode(b"verify me").unwrap();
        assert!(coder.verify(&shards).unwrap());

        let mut corrupted = shards.clone();
        corrupted[0][0] ^= 0xFF;
        assert!(!coder.verify(&corrupted).unwrap());

        // Wrong shard count is not a valid set
        assert!(!coder.verify(&shards[..5].to_vec()).unwrap());
    }

    #[test]
    fn test_odd_sizes_align() {
        let coder = coder(4, 2);
        // 401 bytes: ceil(401/4)=101 would be an odd shard size without alignment
        let data = vec![7u8; 401];
        let shards = coder.encode(&data).unwrap();
        assert_eq!(shards[0].len() % 64, 0);

        let mut slots: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        slots[3] = None;
        assert_eq!(coder.decode(&mut slots, data.len()).unwrap(), data);
    }

    #[test]
    fn test_invalid_profiles() {
        assert!(ErasureCoder::new(ErasureProfile::new(0, 2)).is_err());
        assert!(ErasureCoder::new(ErasureProfile::new(4, 0)).is_err());
        assert!(ErasureCoder::new(ErasureProfile::new(200, 100)).is_err());
    }

    #[test]
    fn test_profile_presets() {
        assert_eq!(ErasureProfile::EC_4_2.total_shards(), 6);
        assert_eq!(ErasureProfile::EC_8_2.total_shards(), 10);
        assert_eq!(ErasureProfile::EC_4_4.total_shards(), 8);
        assert!((ErasureProfile::EC_4_4.efficiency() - 0.5).abs() < f64::EPSILON);
    }
}
