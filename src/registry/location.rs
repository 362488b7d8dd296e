//! Persisted object → physical location record

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of disk indices a location can name
pub const MAX_DISK_IDXS: usize = 16;

/// Reserved name of the latest-version pointer
pub const LATEST: &str = "latest";

/// Reject version ids that cannot name a record
///
/// Ids are one path segment of the registry key, so `/` and NUL are
/// refused along with the reserved `latest`.
pub fn validate_version_id(version_id: &str) -> Result<()> {
    if version_id.is_empty()
        || version_id == LATEST
        || version_id.contains('/')
        || version_id.contains('\0')
    {
        return Err(Error::InvalidArgument(format!(
            "invalid version id '{}'",
            version_id
        )));
    }
    Ok(())
}

/// Which version of an object a call refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum VersionSelector {
    #[default]
    Latest,
    Id(String),
}

impl VersionSelector {
    /// `None` and empty strings select the latest version
    pub fn from_option(version: Option<&str>) -> Self {
        match version {
            Some(v) if !v.is_empty() && v != LATEST => VersionSelector::Id(v.to_string()),
            _ => VersionSelector::Latest,
        }
    }

    pub fn is_latest(&self) -> bool {
        matches!(self, VersionSelector::Latest)
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => f.write_str(LATEST),
            VersionSelector::Id(id) => f.write_str(id),
        }
    }
}

/// Where one version of an object was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub object: String,
    pub version_id: String,
    pub pool_idx: usize,
    pub set_idx: usize,
    /// Disks in the set at write time
    pub disk_count: usize,
    /// Positions within the set that hold this object's data
    pub disk_idxs: Vec<usize>,
    /// Topology generation at write time
    pub generation: u64,
    pub mod_time: DateTime<Utc>,
    pub size: u64,
}

impl ObjectLocation {
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() || self.object.is_empty() {
            return Err(Error::InvalidArgument(
                "location needs a bucket and an object".to_string(),
            ));
        }
        validate_version_id(&self.version_id)?;
        if self.disk_count > MAX_DISK_IDXS {
            return Err(Error::InvalidArgument(format!(
                "disk_count {} exceeds {}",
                self.disk_count, MAX_DISK_IDXS
            )));
        }
        if self.disk_idxs.len() > MAX_DISK_IDXS {
            return Err(Error::InvalidArgument(format!(
                "{} disk indices exceed {}",
                self.disk_idxs.len(),
                MAX_DISK_IDXS
            )));
        }
        let mut seen = [false; MAX_DISK_IDXS];
        for &idx in &self.disk_idxs {
            if idx >= self.disk_count {
                return Err(Error::InvalidArgument(format!(
                    "disk index {} out of range for {} disks",
                    idx, self.disk_count
                )));
            }
            if seen[idx] {
                return Err(Error::InvalidArgument(format!(
                    "duplicate disk index {}",
                    idx
                )));
            }
            seen[idx] = true;
        }
        Ok(())
    }

    /// Selector naming exactly this version
    pub fn selector(&self) -> VersionSelector {
        VersionSelector::Id(self.version_id.clone())
    }
}
