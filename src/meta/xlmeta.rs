//! `xl.meta` per-object metadata document
//!
//! One copy lives next to the chunks on every disk of the owning set; copies
//! differ only in `erasure.index`. Serialized as JSON with camelCase keys.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Document layout version
pub const XL_META_VERSION: &str = "1.0.0";
/// Format tag
pub const XL_META_FORMAT: &str = "xl";
/// K+M Reed-Solomon layout
pub const ALGORITHM_REED_SOLOMON: &str = "reedsolomon";
/// Whole payload in `chunk.1` on one disk
pub const ALGORITHM_NONE: &str = "none";
/// Chunk checksum algorithm tag
pub const CHECKSUM_SHA256: &str = "sha256";

// =============================================================================
// Sections
// =============================================================================

/// Checksum of one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    pub algorithm: String,
    /// 32-byte digest, lowercase hex on the wire
    #[serde(with = "hex_digest")]
    pub digest: [u8; 32],
}

impl ChecksumInfo {
    /// SHA-256 of `data`
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algorithm: CHECKSUM_SHA256.to_string(),
            digest: Sha256::digest(data).into(),
        }
    }

    /// Whether `data` matches this checksum
    pub fn verify(&self, data: &[u8]) -> bool {
        self.algorithm == CHECKSUM_SHA256 && Sha256::digest(data).as_slice() == self.digest
    }
}

mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(&text, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}

/// Size and modification time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatInfo {
    pub size: u64,
    pub mod_time: DateTime<Utc>,
}

/// Erasure layout of the object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureInfo {
    pub algorithm: String,
    /// K
    pub data: usize,
    /// M
    pub parity: usize,
    /// Chunk size in bytes
    pub block_size: usize,
    /// 1-based index of the chunk stored next to this copy
    pub index: usize,
    /// 1-based disk position holding chunk i
    #[serde(default)]
    pub distribution: Vec<usize>,
    #[serde(default)]
    pub checksums: Vec<ChecksumInfo>,
}

impl ErasureInfo {
    /// Layout of an inline object: no chunks at all
    pub fn inline() -> Self {
        Self {
            algorithm: ALGORITHM_NONE.to_string(),
            data: 1,
            parity: 0,
            block_size: 0,
            index: 1,
            distribution: Vec::new(),
            checksums: Vec::new(),
        }
    }

    pub fn total_chunks(&self) -> usize {
        self.data + self.parity
    }
}

/// S3 object attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectAttributes {
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    /// User-defined `x-amz-meta-*` pairs
    #[serde(default)]
    pub user: BTreeMap<String, String>,
}

/// Version flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersioningInfo {
    pub version_id: String,
    pub is_latest: bool,
    #[serde(default)]
    pub is_delete_marker: bool,
}

// =============================================================================
// Document
// =============================================================================

/// Per-object metadata document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XlMeta {
    pub version: String,
    pub format: String,
    pub stat: StatInfo,
    pub erasure: ErasureInfo,
    #[serde(default)]
    pub meta: ObjectAttributes,
    pub versioning: VersioningInfo,
    /// Base64 payload of an inline object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<String>,
}

impl XlMeta {
    pub fn new(
        stat: StatInfo,
        erasure: ErasureInfo,
        meta: ObjectAttributes,
        versioning: VersioningInfo,
        inline_data: Option<String>,
    ) -> Self {
        Self {
            version: XL_META_VERSION.to_string(),
            format: XL_META_FORMAT.to_string(),
            stat,
            erasure,
            meta,
            versioning,
            inline_data,
        }
    }

    pub fn is_inline(&self) -> bool {
        self.inline_data.is_some()
    }

    /// Copy destined for the disk holding chunk `index`
    pub fn for_index(&self, index: usize) -> Self {
        let mut copy = self.clone();
        copy.erasure.index = index;
        copy
    }

    /// Decoded inline payload
    pub fn inline_bytes(&self) -> Result<Vec<u8>> {
        match &self.inline_data {
            Some(text) => crate::transport::rpc::b64_decode(text),
            None => Err(Error::InvalidArgument("object is not inline".to_string())),
        }
    }

    /// Structural checks; every failure is Corrupt
    pub fn validate(&self) -> Result<()> {
        if self.format != XL_META_FORMAT {
            return Err(Error::Corrupt(format!("unknown format '{}'", self.format)));
        }
        if self.version.is_empty() {
            return Err(Error::Corrupt("missing version".to_string()));
        }
        let erasure = &self.erasure;

        if self.is_inline() {
            if !erasure.distribution.is_empty() || !erasure.checksums.is_empty() {
                return Err(Error::Corrupt(
                    "inline object carries a chunk layout".to_string(),
                ));
            }
            return Ok(());
        }

        let total = erasure.total_chunks();
        match erasure.algorithm.as_str() {
            ALGORITHM_REED_SOLOMON if erasure.data >= 1 && erasure.parity >= 1 => {}
            ALGORITHM_NONE if erasure.data == 1 && erasure.parity == 0 => {}
            other => {
                return Err(Error::Corrupt(format!(
                    "invalid erasure layout {} {}+{}",
                    other, erasure.data, erasure.parity
                )))
            }
        }
        if erasure.distribution.len() != total || erasure.checksums.len() != total {
            return Err(Error::Corrupt(format!(
                "expected {} distribution entries and checksums, found {} and {}",
                total,
                erasure.distribution.len(),
                erasure.checksums.len()
            )));
        }
        if erasure.index == 0 || erasure.index > total {
            return Err(Error::Corrupt(format!(
                "erasure index {} outside 1..={}",
                erasure.index, total
            )));
        }
        if (erasure.block_size as u64) * (erasure.data as u64) < self.stat.size {
            return Err(Error::Corrupt(format!(
                "{} chunks of {} bytes cannot hold {} bytes",
                erasure.data, erasure.block_size, self.stat.size
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a stored copy
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let meta: XlMeta = serde_json::from_slice(bytes)
            .map_err(|e| Error::Corrupt(format!("unparseable xl.meta: {}", e)))?;
        meta.validate()?;
        Ok(meta)
    }
}
