//! Property-Based Tests for the Erasure Codec
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: decode(encode(data)) = data
//! 2. **Fault Tolerance**: any pattern of up to m lost chunks recovers
//! 3. **Determinism**: same input always produces the same chunks
//! 4. **Failure Mode**: more than m lost chunks is a Quorum error

#![cfg(test)]

use proptest::prelude::*;

use super::encoder::{calculate_chunk_size, ReedSolomonCodec};
use crate::error::Error;

// =============================================================================
// Property Strategies
// =============================================================================

/// Small k+m configurations for faster tests.
fn small_ec_config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (2usize..=4, 1usize..=2)
}

/// Payloads of various small sizes.
fn small_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..1000)
}

fn encode_all(codec: &ReedSolomonCodec, data: &[u8]) -> Result<Vec<Option<Vec<u8>>>, Error> {
    Ok(codec
        .encode(data)?
        .into_chunks()
        .into_iter()
        .map(Some)
        .collect())
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Encoding then decoding without any losses returns the original data.
    #[test]
    fn prop_roundtrip_no_loss(
        (k, m) in small_ec_config_strategy(),
        data in small_data_strategy(),
    ) {
        let codec = ReedSolomonCodec::new(k, m)?;
        let mut chunks = encode_all(&codec, &data)?;
        prop_assert_eq!(chunks.len(), k + m);

        let recovered = codec.decode(&mut chunks, data.len())?;
        prop_assert_eq!(recovered, data);
    }

    /// Property: Recovery works regardless of WHICH chunks are lost.
    #[test]
    fn prop_any_erasure_pattern(
        (k, m) in (2usize..=4, 1usize..=2),
        data in prop::collection::vec(any::<u8>(), 100..500),
        erasure_indices in prop::collection::vec(0usize..6, 0..=2),
    ) {
        let codec = ReedSolomonCodec::new(k, m)?;
        let total = k + m;

        let mut erasures: Vec<usize> = erasure_indices
            .into_iter()
            .filter(|&i| i < total)
            .collect();
        erasures.sort();
        erasures.dedup();
        if erasures.len() > m {
            return Ok(());
        }

        let mut chunks = encode_all(&codec, &data)?;
        for &i in &erasures {
            chunks[i] = None;
        }

        let recovered = codec.decode(&mut chunks, data.len())?;
        prop_assert_eq!(recovered, data,
            "Recovery failed for k={}, m={}, erasures={:?}", k, m, erasures);
    }

    /// Property: Chunk sizes are ceil(len / k).
    #[test]
    fn prop_chunk_size_calculation(
        (k, m) in small_ec_config_strategy(),
        data in small_data_strategy(),
    ) {
        let codec = ReedSolomonCodec::new(k, m)?;
        let encoded = codec.encode(&data)?;
        prop_assert_eq!(encoded.chunk_size, calculate_chunk_size(data.len(), k));
        prop_assert_eq!(encoded.chunk_size, data.len().div_ceil(k));
    }
}

// =============================================================================
// Determinism & Failure Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Property: Different codec instances with the same config agree.
    #[test]
    fn prop_encoding_deterministic(
        (k, m) in small_ec_config_strategy(),
        data in small_data_strategy(),
    ) {
        let first = ReedSolomonCodec::new(k, m)?.encode(&data)?.into_chunks();
        let second = ReedSolomonCodec::new(k, m)?.encode(&data)?.into_chunks();
        prop_assert_eq!(first, second);
    }

    /// Property: Losing m+1 chunks is a quorum failure, never wrong data.
    #[test]
    fn prop_too_many_erasures_fails(
        (k, m) in (2usize..=4, 1usize..=2),
        data in prop::collection::vec(any::<u8>(), 100..500),
    ) {
        let codec = ReedSolomonCodec::new(k, m)?;
        let mut chunks = encode_all(&codec, &data)?;
        for slot in chunks.iter_mut().take(m + 1) {
            *slot = None;
        }

        let result = codec.decode(&mut chunks, data.len());
        prop_assert!(
            matches!(result, Err(Error::Quorum { .. })),
            "Should fail with {} erasures (m={})", m + 1, m
        );
    }
}
