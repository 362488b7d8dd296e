//! Location Registry
//!
//! Write-through cache over the persisted object → location mapping.
//!
//! ```text
//!   record ──▶ backend.put({b}/{o}/{v}.json, {b}/{o}/latest.json) ──▶ cache.insert
//!   lookup ──▶ cache.get ──hit──▶ clone
//!                  │ miss / expired
//!                  ▼
//!              backend.get ──▶ cache.insert ──▶ clone   (absent → NotFound)
//! ```
//!
//! Storage is authoritative: `record` fails if the backend write fails, and
//! the cache is only filled afterwards. `delete` is idempotent and never
//! surfaces backend errors.

mod backend;
mod location;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStats, LruCache};
use crate::error::{Error, Result};

pub use backend::{BackendStats, MemoryRegistryBackend, RegistryBackend};
pub use location::{validate_version_id, ObjectLocation, VersionSelector, LATEST, MAX_DISK_IDXS};

/// Bucket holding registry records when they are stored as objects
pub const REGISTRY_BUCKET: &str = ".shardvault.registry";

/// Cached, persisted object locations
pub struct LocationRegistry {
    backend: Arc<dyn RegistryBackend>,
    cache: LruCache<ObjectLocation>,
}

impl LocationRegistry {
    pub fn new(backend: Arc<dyn RegistryBackend>, cache_capacity: usize, cache_ttl: Duration) -> Self {
        Self {
            backend,
            cache: LruCache::new(cache_capacity, cache_ttl),
        }
    }

    /// Backend key of a record
    pub fn storage_key(bucket: &str, object: &str, version: &VersionSelector) -> String {
        format!("{}/{}/{}.json", bucket, object, version)
    }

    /// Persist a location as the latest version, then cache it
    #[instrument(skip(self, location), fields(bucket = %location.bucket, object = %location.object))]
    pub fn record(&self, location: &ObjectLocation) -> Result<()> {
        self.persist(location, true)
    }

    fn persist(&self, location: &ObjectLocation, as_latest: bool) -> Result<()> {
        location.validate()?;
        if location.bucket == REGISTRY_BUCKET {
            debug!("Skipping registry record for the registry bucket");
            return Ok(());
        }

        let data = Bytes::from(serde_json::to_vec(location)?);
        let version_key = Self::storage_key(&location.bucket, &location.object, &location.selector());
        let latest_key = Self::storage_key(&location.bucket, &location.object, &VersionSelector::Latest);

        self.backend.put(&version_key, data.clone())?;
        if as_latest {
            self.backend.put(&latest_key, data)?;
        }

        self.cache.insert(version_key, location.clone());
        if as_latest {
            self.cache.insert(latest_key, location.clone());
        }
        debug!(version = %location.version_id, as_latest, "Recorded object location");
        Ok(())
    }

    /// Find a location, reading through to storage on a cache miss
    pub fn lookup(&self, bucket: &str, object: &str, version: &VersionSelector) -> Result<ObjectLocation> {
        let key = Self::storage_key(bucket, object, version);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let Some(bytes) = self.backend.get(&key)? else {
            debug!(bucket, object, %version, "Location not found");
            return Err(Error::NotFound(format!("location of {}/{} ({})", bucket, object, version)));
        };
        let location: ObjectLocation = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Corrupt(format!("registry record {}: {}", key, e)))?;
        self.cache.insert(key, location.clone());
        Ok(location)
    }

    /// Replace a record wholesale
    ///
    /// The latest pointer follows only when it already names this version,
    /// or when no latest record exists.
    pub fn update(&self, location: &ObjectLocation) -> Result<()> {
        location.validate()?;
        self.cache_invalidate(&location.bucket, &location.object, &location.selector());
        self.cache_invalidate(&location.bucket, &location.object, &VersionSelector::Latest);

        let latest_key = Self::storage_key(&location.bucket, &location.object, &VersionSelector::Latest);
        let as_latest = match self.backend.get(&latest_key)? {
            None => true,
            Some(bytes) => match serde_json::from_slice::<ObjectLocation>(&bytes) {
                Ok(current) => current.version_id == location.version_id,
                Err(e) => {
                    warn!(key = %latest_key, error = %e, "Replacing unreadable latest record");
                    true
                }
            },
        };
        self.persist(location, as_latest)
    }

    /// Remove a record; backend failures are logged, not returned
    #[instrument(skip(self))]
    pub fn delete(&self, bucket: &str, object: &str, version: &VersionSelector) {
        let latest_key = Self::storage_key(bucket, object, &VersionSelector::Latest);
        let latest_version = match self.backend.get(&latest_key) {
            Ok(Some(bytes)) => serde_json::from_slice::<ObjectLocation>(&bytes)
                .ok()
                .map(|l| l.version_id),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Registry read failed during delete");
                None
            }
        };

        let target = match version {
            VersionSelector::Id(id) => Some(id.clone()),
            VersionSelector::Latest => latest_version.clone(),
        };

        let mut keys = Vec::with_capacity(2);
        if let Some(id) = &target {
            keys.push(Self::storage_key(bucket, object, &VersionSelector::Id(id.clone())));
        }
        if version.is_latest() || (latest_version.is_some() && latest_version == target) {
            keys.push(latest_key);
        }

        for key in keys {
            if let Err(e) = self.backend.delete(&key) {
                warn!(key = %key, error = %e, "Registry delete failed");
            }
            self.cache.remove(&key);
        }
    }

    /// Record many locations; one failure never aborts the rest
    pub fn record_batch(&self, locations: &[ObjectLocation]) -> Vec<Result<()>> {
        locations.iter().map(|l| self.record(l)).collect()
    }

    /// Look up many objects; results are in request order
    pub fn lookup_batch(&self, requests: &[(String, String, VersionSelector)]) -> Vec<Result<ObjectLocation>> {
        requests
            .iter()
            .map(|(bucket, object, version)| self.lookup(bucket, object, version))
            .collect()
    }

    /// Drop a cached entry without touching storage
    pub fn cache_invalidate(&self, bucket: &str, object: &str, version: &VersionSelector) {
        self.cache.remove(&Self::storage_key(bucket, object, version));
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn backend_stats(&self) -> BackendStats {
        self.backend.stats()
    }
}

// =============================================================================
// Tests
// =============================================================================
