//! Erasure Coding Module
//!
//! Reed-Solomon K+M coding for object payloads.
//!
//! # Components
//!
//! - **Codec** (`encoder.rs`): Reed-Solomon encoding and decoding using the
//!   `reed-solomon-erasure` crate:
//!   - Split a payload into K equally sized data chunks + M parity chunks
//!   - Reconstruct the payload from any K surviving chunks
//!   - Verify parity consistency
//!
//! # Usage
//!
//! ```rust
//! use shardvault::ec::ReedSolomonCodec;
//!
//! let codec = ReedSolomonCodec::new(4, 2).unwrap();
//! let data = b"Hello, World!";
//!
//! let mut chunks: Vec<Option<Vec<u8>>> =
//!     codec.encode(data).unwrap().into_chunks().into_iter().map(Some).collect();
//! chunks[0] = None;
//! chunks[3] = None;
//!
//! let recovered = codec.decode(&mut chunks, data.len()).unwrap();
//! assert_eq!(recovered, data);
//! ```

pub mod encoder;

#[cfg(test)]
mod proptest;

pub use encoder::{calculate_chunk_size, EncodedChunks, ReedSolomonCodec, MAX_TOTAL_SHARDS};
