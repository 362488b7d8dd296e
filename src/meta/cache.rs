//! Metadata cache
//!
//! Full `XlMeta` documents keyed by bucket, object and version. Key parts
//! are joined with NUL, which names never contain, so an object whose name
//! ends in `/{version}` cannot alias another object's version. A miss always
//! goes back to the disks.

use std::time::Duration;

use tracing::trace;

use super::xlmeta::XlMeta;
use crate::cache::{CacheStats, LruCache};
use crate::registry::VersionSelector;

/// Cache of parsed metadata documents
pub struct MetadataCache {
    cache: LruCache<XlMeta>,
}

impl MetadataCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: LruCache::new(capacity, ttl),
        }
    }

    fn key(bucket: &str, object: &str, version: &VersionSelector) -> String {
        match version {
            VersionSelector::Latest => format!("{}\0{}", bucket, object),
            VersionSelector::Id(id) => format!("{}\0{}\0{}", bucket, object, id),
        }
    }

    pub fn get(&self, bucket: &str, object: &str, version: &VersionSelector) -> Option<XlMeta> {
        let hit = self.cache.get(&Self::key(bucket, object, version));
        trace!(bucket, object, hit = hit.is_some(), "Metadata cache probe");
        hit
    }

    /// Cache under the version key, and under the latest key when it is latest
    pub fn put(&self, bucket: &str, object: &str, meta: &XlMeta) {
        let version = VersionSelector::Id(meta.versioning.version_id.clone());
        self.cache
            .insert(Self::key(bucket, object, &version), meta.clone());
        if meta.versioning.is_latest {
            self.cache
                .insert(Self::key(bucket, object, &VersionSelector::Latest), meta.clone());
        }
    }

    pub fn invalidate(&self, bucket: &str, object: &str, version: &VersionSelector) {
        self.cache.remove(&Self::key(bucket, object, version));
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
