//! EC Integration Tests
//!
//! End-to-end tests of the Reed-Solomon codec as the data path uses it.

use assert_matches::assert_matches;
use shardvault::ec::{calculate_chunk_size, ReedSolomonCodec};
use shardvault::Error;

fn as_options(chunks: Vec<Vec<u8>>) -> Vec<Option<Vec<u8>>> {
    chunks.into_iter().map(Some).collect()
}

// =============================================================================
// Codec Integration Tests
// =============================================================================

#[test]
fn test_encode_decode_full_pipeline() {
    let codec = ReedSolomonCodec::new(4, 2).expect("Failed to create codec");

    let original_data = b"This is test data for the full EC pipeline integration test. It should be long enough to span multiple chunks.";

    let encoded = codec.encode(original_data).expect("Failed to encode");
    assert_eq!(encoded.data.len(), 4);
    assert_eq!(encoded.parity.len(), 2);
    assert_eq!(encoded.chunk_size, calculate_chunk_size(original_data.len(), 4));

    let chunks = encoded.into_chunks();
    assert!(codec.verify(&chunks).expect("Verify failed"));

    let mut chunks = as_options(chunks);
    let recovered = codec
        .decode(&mut chunks, original_data.len())
        .expect("Failed to decode");
    assert_eq!(recovered, original_data);
}

#[test]
fn test_encode_decode_with_max_chunk_loss() {
    let codec = ReedSolomonCodec::new(4, 2).expect("Failed to create codec");
    let original_data = b"Data for maximum chunk loss recovery test.";

    let mut chunks = as_options(codec.encode(original_data).unwrap().into_chunks());
    chunks[0] = None;
    chunks[5] = None;

    let recovered = codec
        .decode(&mut chunks, original_data.len())
        .expect("Failed to decode with max loss");
    assert_eq!(recovered, original_data);
}

#[test]
fn test_encode_decode_beyond_max_loss_is_quorum() {
    let codec = ReedSolomonCodec::new(4, 2).expect("Failed to create codec");
    let original_data = b"Data that should not be recoverable.";

    let mut chunks = as_options(codec.encode(original_data).unwrap().into_chunks());
    chunks[0] = None;
    chunks[1] = None;
    chunks[2] = None;

    assert_matches!(
        codec.decode(&mut chunks, original_data.len()),
        Err(Error::Quorum {
            available: 3,
            required: 4
        })
    );
}

#[test]
fn test_different_ec_configurations() {
    let configs = vec![(2, 1), (4, 2), (6, 3), (8, 4), (12, 4)];
    let test_data = b"Test data for configuration verification across different EC schemes.";

    for (data_shards, parity_shards) in configs {
        let codec = ReedSolomonCodec::new(data_shards, parity_shards).expect("Failed to create codec");
        let chunks = codec.encode(test_data).unwrap().into_chunks();
        assert_eq!(chunks.len(), data_shards + parity_shards);

        let mut degraded = as_options(chunks);
        for chunk in degraded.iter_mut().take(parity_shards) {
            *chunk = None;
        }

        let recovered = codec
            .decode(&mut degraded, test_data.len())
            .unwrap_or_else(|_| panic!("Failed to recover with {}+{} config", data_shards, parity_shards));
        assert_eq!(
            recovered, test_data,
            "Data mismatch with {}+{} config",
            data_shards, parity_shards
        );
    }
}

#[test]
fn test_large_data_encoding() {
    let codec = ReedSolomonCodec::new(4, 2).expect("Failed to create codec");
    let original_data: Vec<u8> = (0..1024 * 1024 + 3).map(|i| (i % 256) as u8).collect();

    let encoded = codec.encode(&original_data).expect("Failed to encode large data");
    assert_eq!(encoded.chunk_size, 262_145);
    let chunks = encoded.into_chunks();
    assert!(chunks.iter().all(|c| c.len() == 262_145));

    let mut chunks = as_options(chunks);
    chunks[3] = None;
    let recovered = codec
        .decode(&mut chunks, original_data.len())
        .expect("Failed to decode large data");
    assert_eq!(recovered, original_data);
}

#[test]
fn test_reconstruction_preserves_data_integrity() {
    let codec = ReedSolomonCodec::new(4, 2).expect("Failed to create codec");
    let original_data: Vec<u8> = (0u8..=255u8).cycle().take(4096).collect();
    let chunks = codec.encode(&original_data).unwrap().into_chunks();

    let loss_patterns = vec![
        vec![0],
        vec![3],
        vec![5],
        vec![0, 1],
        vec![0, 5],
        vec![4, 5],
        vec![1, 3],
    ];

    for pattern in loss_patterns {
        let mut degraded = as_options(chunks.clone());
        for idx in &pattern {
            degraded[*idx] = None;
        }

        let recovered = codec
            .decode(&mut degraded, original_data.len())
            .unwrap_or_else(|_| panic!("Failed with loss pattern: {:?}", pattern));
        assert_eq!(
            recovered, original_data,
            "Data mismatch with loss pattern: {:?}",
            pattern
        );
    }
}

#[test]
fn test_encoding_is_deterministic() {
    let codec = ReedSolomonCodec::new(4, 2).expect("Failed to create codec");
    let original_data = b"Consistency test data for multiple encode/decode cycles.";

    let first = codec.encode(original_data).unwrap().into_chunks();
    let second = codec.encode(original_data).unwrap().into_chunks();
    assert_eq!(first, second, "Encoding should be deterministic");
}

#[test]
fn test_invalid_layouts_rejected() {
    assert!(ReedSolomonCodec::new(0, 2).is_err());
    assert!(ReedSolomonCodec::new(30, 4).is_err());

    let codec = ReedSolomonCodec::new(2, 1).unwrap();
    assert!(codec.encode(b"").is_err());

    let mut wrong_count = vec![Some(vec![0u8; 4]); 2];
    assert!(codec.decode(&mut wrong_count, 8).is_err());
}
