//! Hash Primitives
//!
//! Deterministic hashing used by placement, cache bucketing and the on-disk
//! layout. The bit-level algorithms come from `siphasher` (SipHash-2-4) and
//! `xxhash-rust` (xxHash-64); this module only fixes how they are keyed and
//! how their output is rendered.

use std::hash::Hasher;

use siphasher::sip::SipHasher24;

use crate::error::{Error, Result};

/// Keyed SipHash-2-4 over raw bytes.
///
/// Writes the bytes as-is (no length suffix), so equal inputs hash equal on
/// every node that shares the key.
#[inline]
#[must_use]
pub fn siphash(k0: u64, k1: u64, bytes: &[u8]) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(k0, k1);
    hasher.write(bytes);
    hasher.finish()
}

/// Seeded xxHash-64 over raw bytes.
#[inline]
#[must_use]
pub fn xxhash64(seed: u64, bytes: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(bytes, seed)
}

/// SipHash key pair derived from a deployment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipKey {
    pub k0: u64,
    pub k1: u64,
}

impl SipKey {
    /// Derive the key halves from a deployment UUID.
    ///
    /// `k0` is the first 8 bytes and `k1` the last 8 bytes, both read
    /// little-endian.
    pub fn from_deployment_id(deployment_id: &str) -> Result<Self> {
        let uuid = uuid::Uuid::parse_str(deployment_id.trim()).map_err(|e| {
            Error::InvalidArgument(format!("malformed deployment id '{}': {}", deployment_id, e))
        })?;
        Ok(Self::from_bytes(uuid.as_bytes()))
    }

    /// Derive the key halves from 16 raw bytes
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&bytes[..8]);
        hi.copy_from_slice(&bytes[8..]);
        Self {
            k0: u64::from_le_bytes(lo),
            k1: u64::from_le_bytes(hi),
        }
    }

    /// Hash bytes under this key
    #[inline]
    pub fn hash(&self, bytes: &[u8]) -> u64 {
        siphash(self.k0, self.k1, bytes)
    }

    /// Ring position of an object
    #[inline]
    pub fn object_position(&self, bucket: &str, object: &str) -> u64 {
        self.hash(format!("{}/{}", bucket, object).as_bytes())
    }
}

/// 16 lowercase hex digits of an object hash
#[inline]
pub fn object_hash_hex(object_hash: u64) -> String {
    format!("{:016x}", object_hash)
}

/// Two-hex-digit directory prefix of an object hash
#[inline]
pub fn hash_prefix(object_hash: u64) -> String {
    format!("{:02x}", object_hash >> 56)
}

/// Relative directory of an object on a disk: `{prefix}/{hash}`
pub fn object_dir(object_hash: u64) -> String {
    format!("{}/{}", hash_prefix(object_hash), object_hash_hex(object_hash))
}

// =============================================================================
// Tests
// =============================================================================
