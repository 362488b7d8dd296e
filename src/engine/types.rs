//! Object API request and response types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::meta::{ErasureInfo, XlMeta};
use crate::placement::PlacementResult;
use crate::registry::ObjectLocation;

/// Content type stored when the caller gives none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Optional attributes of a Put
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    /// User-defined `x-amz-meta-*` pairs
    pub user_metadata: BTreeMap<String, String>,
    /// Explicit version id; a fresh UUID otherwise
    pub version_id: Option<String>,
}

impl PutOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    pub fn with_user_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(key.into(), value.into());
        self
    }
}

/// Object attributes as seen by S3 callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub bucket: String,
    pub object: String,
    pub version_id: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub cache_control: Option<String>,
    pub user_metadata: BTreeMap<String, String>,
    pub mod_time: DateTime<Utc>,
    pub is_inline: bool,
}

impl ObjectInfo {
    pub fn from_meta(bucket: &str, object: &str, meta: &XlMeta) -> Self {
        Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
            version_id: meta.versioning.version_id.clone(),
            size: meta.stat.size,
            etag: meta.meta.etag.clone(),
            content_type: meta.meta.content_type.clone(),
            cache_control: meta.meta.cache_control.clone(),
            user_metadata: meta.meta.user.clone(),
            mod_time: meta.stat.mod_time,
            is_inline: meta.is_inline(),
        }
    }
}

/// Everything known about one stored object
#[derive(Debug, Clone, Serialize)]
pub struct ObjectStat {
    pub info: ObjectInfo,
    /// Registry record, absent when the registry has none
    pub location: Option<ObjectLocation>,
    pub placement: PlacementResult,
    pub erasure: ErasureInfo,
}

/// How competing metadata copies are resolved on read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataReadPolicy {
    /// Candidates are tried local first; the first parseable, valid copy wins
    #[default]
    FirstValid,
}

/// Reject empty bucket and object names
pub fn validate_names(bucket: &str, object: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(Error::InvalidArgument("bucket name is empty".to_string()));
    }
    if object.is_empty() {
        return Err(Error::InvalidArgument("object name is empty".to_string()));
    }
    if bucket.contains('/') || bucket.contains('\0') || object.contains('\0') {
        return Err(Error::InvalidArgument(format!(
            "invalid object name {}/{}",
            bucket, object
        )));
    }
    Ok(())
}
