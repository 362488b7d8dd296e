//! Erasure Coding Codec
//!
//! Reed-Solomon encoding and decoding over GF(2^8) using the
//! `reed-solomon-erasure` crate. Data is split into K equally sized data
//! chunks (`chunk_size = ceil(len / K)`, zero padded) followed by M parity
//! chunks; any K of the K+M chunks reconstruct the original bytes.

use crate::error::{Error, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Upper bound on K+M, matching the orchestrator's maximum fan-out
pub const MAX_TOTAL_SHARDS: usize = 32;

// =============================================================================
// Encoded Output
// =============================================================================

/// Result of encoding one object
#[derive(Debug, Clone)]
pub struct EncodedChunks {
    /// K data chunks
    pub data: Vec<Vec<u8>>,
    /// M parity chunks
    pub parity: Vec<Vec<u8>>,
    /// Size of every chunk in bytes
    pub chunk_size: usize,
    /// Length of the input before padding
    pub original_len: usize,
}

impl EncodedChunks {
    /// All chunks in index order (data first, then parity)
    pub fn into_chunks(self) -> Vec<Vec<u8>> {
        let mut chunks = self.data;
        chunks.extend(self.parity);
        chunks
    }
}

// =============================================================================
// Reed-Solomon Codec
// =============================================================================

/// K+M Reed-Solomon codec
#[derive(Clone)]
pub struct ReedSolomonCodec {
    /// Reed-Solomon codec instance
    rs: Arc<ReedSolomon>,
    /// Number of data shards (k)
    data_shards: usize,
    /// Number of parity shards (m)
    parity_shards: usize,
}

impl std::fmt::Debug for ReedSolomonCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReedSolomonCodec")
            .field("data_shards", &self.data_shards)
            .field("parity_shards", &self.parity_shards)
            .finish()
    }
}

impl ReedSolomonCodec {
    /// Create a codec with the specified k+m configuration
    ///
    /// # Arguments
    /// * `data_shards` - Number of data shards (k)
    /// * `parity_shards` - Number of parity shards (m)
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(Error::InvalidEcConfig(
                "data_shards must be greater than 0".to_string(),
            ));
        }
        if parity_shards == 0 {
            return Err(Error::InvalidEcConfig(
                "parity_shards must be greater than 0".to_string(),
            ));
        }
        if data_shards + parity_shards > MAX_TOTAL_SHARDS {
            return Err(Error::InvalidEcConfig(format!(
                "data_shards + parity_shards must not exceed {}",
                MAX_TOTAL_SHARDS
            )));
        }

        let rs = ReedSolomon::new(data_shards, parity_shards).map_err(|e| {
            Error::InvalidEcConfig(format!("Failed to create Reed-Solomon codec: {}", e))
        })?;

        Ok(Self {
            rs: Arc::new(rs),
            data_shards,
            parity_shards,
        })
    }

    /// Get the number of data shards
    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Get the number of parity shards
    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Get the total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Chunk size this codec uses for `data_len` bytes
    pub fn chunk_size(&self, data_len: usize) -> usize {
        calculate_chunk_size(data_len, self.data_shards)
    }

    /// Encode data into K data chunks and M parity chunks
    ///
    /// The last data chunk is zero padded up to `chunk_size`.
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn encode(&self, data: &[u8]) -> Result<EncodedChunks> {
        if data.is_empty() {
            return Err(Error::Codec("cannot erasure-code an empty payload".to_string()));
        }

        let chunk_size = self.chunk_size(data.len());
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());

        for i in 0..self.data_shards {
            let start = i * chunk_size;
            let end = std::cmp::min(start + chunk_size, data.len());

            let mut shard = if start < data.len() {
                data[start..end].to_vec()
            } else {
                Vec::new()
            };
            shard.resize(chunk_size, 0);
            shards.push(shard);
        }

        for _ in 0..self.parity_shards {
            shards.push(vec![0u8; chunk_size]);
        }

        self.rs
            .encode(&mut shards)
            .map_err(|e| Error::Codec(format!("Reed-Solomon encoding failed: {}", e)))?;

        debug!(
            "Encoded {} bytes into {} chunks of {} bytes each",
            data.len(),
            self.total_shards(),
            chunk_size
        );

        let parity = shards.split_off(self.data_shards);
        Ok(EncodedChunks {
            data: shards,
            parity,
            chunk_size,
            original_len: data.len(),
        })
    }

    /// Check that parity chunks are consistent with data chunks
    pub fn verify(&self, chunks: &[Vec<u8>]) -> Result<bool> {
        if chunks.len() != self.total_shards() {
            return Err(Error::InvalidEcConfig(format!(
                "Expected {} shards, got {}",
                self.total_shards(),
                chunks.len()
            )));
        }

        self.rs
            .verify(chunks)
            .map_err(|e| Error::Codec(format!("Verification failed: {}", e)))
    }

    /// Decode any K of the K+M chunks back to the original bytes
    ///
    /// # Arguments
    /// * `shards` - K+M optional chunks (None for missing)
    /// * `original_size` - Size of the original data (to trim padding)
    #[instrument(skip(self, shards), fields(original_size))]
    pub fn decode(&self, shards: &mut [Option<Vec<u8>>], original_size: usize) -> Result<Vec<u8>> {
        if shards.len() != self.total_shards() {
            return Err(Error::InvalidEcConfig(format!(
                "Expected {} shards, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards {
            return Err(Error::Quorum {
                available,
                required: self.data_shards,
            });
        }

        let mut sizes = shards.iter().flatten().map(|s| s.len());
        if let Some(first) = sizes.next() {
            if sizes.any(|len| len != first) {
                return Err(Error::Corrupt("chunks have mismatched sizes".to_string()));
            }
            if first * self.data_shards < original_size {
                return Err(Error::Corrupt(format!(
                    "chunks of {} bytes cannot hold {} bytes",
                    first, original_size
                )));
            }
        }

        if available < self.total_shards() {
            self.rs
                .reconstruct_data(shards)
                .map_err(|e| Error::Codec(format!("Reed-Solomon reconstruction failed: {}", e)))?;

            debug!(
                "Reconstructed data chunks from {}/{} available",
                available,
                self.total_shards()
            );
        }

        let mut data = Vec::with_capacity(original_size);
        for s in shards.iter().take(self.data_shards).flatten() {
            data.extend_from_slice(s);
        }
        data.truncate(original_size);

        Ok(data)
    }
}

/// Calculate the chunk size for given data size and data shard count
pub fn calculate_chunk_size(data_size: usize, data_shards: usize) -> usize {
    data_size.div_ceil(data_shards)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn as_optional(chunks: Vec<Vec<u8>>) -> Vec<Option<Vec<u8>>> {
        chunks.into_iter().map(Some).collect()
    }

    #[test]
    fn test_codec_new() {
        let codec = ReedSolomonCodec::new(4, 2).unwrap();
        assert_eq!(codec.data_shards(), 4);
        assert_eq!(codec.parity_shards(), 2);
        assert_eq!(codec.total_shards(), 6);
    }

    #[test]
    fn test_codec_invalid_config() {
        assert!(ReedSolomonCodec::new(0, 2).is_err());
        assert!(ReedSolomonCodec::new(4, 0).is_err());
        assert!(ReedSolomonCodec::new(24, 9).is_err());
    }

    #[test]
    fn test_encode_shapes() {
        let codec = ReedSolomonCodec::new(4, 2).unwrap();
        let data = b"Hello, World! This is a test of erasure coding.";

        let encoded = codec.encode(data).unwrap();
        assert_eq!(encoded.data.len(), 4);
        assert_eq!(encoded.parity.len(), 2);
        assert_eq!(encoded.chunk_size, calculate_chunk_size(data.len(), 4));
        assert_eq!(encoded.original_len, data.len());

        let chunks = encoded.into_chunks();
        assert!(chunks.iter().all(|c| c.len() == chunks[0].len()));
        assert!(codec.verify(&chunks).unwrap());
    }

    #[test]
    fn test_encode_empty_rejected() {
        let codec = ReedSolomonCodec::new(4, 2).unwrap();
        assert!(matches!(codec.encode(&[]), Err(Error::Codec(_))));
    }

    #[test]
    fn test_decode_without_loss() {
        let codec = ReedSolomonCodec::new(4, 2).unwrap();
        let original = b"This is test data for erasure coding roundtrip!";

        let mut shards = as_optional(codec.encode(original).unwrap().into_chunks());
        let recovered = codec.decode(&mut shards, original.len()).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn test_decode_with_parity_loss() {
        let codec = ReedSolomonCodec::new(4, 2).unwrap();
        let original = b"Testing recovery from chunk loss with erasure coding!";

        let mut shards = as_optional(codec.encode(original).unwrap().into_chunks());
        shards[1] = None;
        shards[4] = None;

        let recovered = codec.decode(&mut shards, original.len()).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn test_decode_insufficient_is_quorum() {
        let codec = ReedSolomonCodec::new(4, 2).unwrap();
        let original = b"not enough survivors";

        let mut shards = as_optional(codec.encode(original).unwrap().into_chunks());
        shards[0] = None;
        shards[2] = None;
        shards[5] = None;

        let result = codec.decode(&mut shards, original.len());
        assert!(matches!(
            result,
            Err(Error::Quorum {
                available: 3,
                required: 4
            })
        ));
    }

    #[test]
    fn test_decode_mismatched_sizes_is_corrupt() {
        let codec = ReedSolomonCodec::new(2, 1).unwrap();
        let mut shards = vec![Some(vec![0u8; 8]), Some(vec![0u8; 7]), None];
        assert!(matches!(
            codec.decode(&mut shards, 10),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_calculate_chunk_size() {
        assert_eq!(calculate_chunk_size(100, 4), 25);
        assert_eq!(calculate_chunk_size(101, 4), 26);
        assert_eq!(calculate_chunk_size(1000, 10), 100);
        assert_eq!(calculate_chunk_size(1, 4), 1);
    }

    #[test]
    fn test_various_configurations() {
        let configs = vec![(2, 1), (4, 2), (6, 3), (8, 4), (12, 4)];

        for (k, m) in configs {
            let codec = ReedSolomonCodec::new(k, m).unwrap();
            let data = b"Test data for various configurations";
            let chunks = codec.encode(data).unwrap().into_chunks();
            assert_eq!(chunks.len(), k + m);

            let mut optional = as_optional(chunks);
            for slot in optional.iter_mut().take(m) {
                *slot = None;
            }

            let recovered = codec.decode(&mut optional, data.len()).unwrap();
            assert_eq!(recovered, data);
        }
    }
}
