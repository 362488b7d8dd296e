//! Bounded in-memory caches
//!
//! One generic [`LruCache`] backs both the location registry cache and the
//! metadata cache. Values are cloned on the way in and on the way out, so a
//! caller never holds a reference into the cache.

mod lru;

pub use lru::{CacheStats, LruCache};
