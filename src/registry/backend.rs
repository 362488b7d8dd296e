//! Registry storage backends

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;

use crate::error::{Error, Result};

/// Durable key → bytes store behind the location registry
pub trait RegistryBackend: Send + Sync {
    /// Store a record, replacing any previous value
    fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Fetch a record; `Ok(None)` when absent
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Remove a record; `Ok(false)` when it was absent
    fn delete(&self, key: &str) -> Result<bool>;

    /// Operation counters
    fn stats(&self) -> BackendStats {
        BackendStats::default()
    }
}

/// Backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BackendStats {
    /// Records currently stored, when the backend can count them cheaply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// In-memory backend for tests and embedding
#[derive(Default)]
pub struct MemoryRegistryBackend {
    records: DashMap<String, Bytes>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    /// Fault injection: fail every put
    fail_writes: AtomicBool,
}

impl MemoryRegistryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RegistryBackend for MemoryRegistryBackend {
    fn put(&self, key: &str, data: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("registry backend unavailable")));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.records.insert(key.to_string(), data);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.get(key).map(|v| v.value().clone()))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.remove(key).is_some())
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            records: Some(self.records.len() as u64),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_basic() {
        let backend = MemoryRegistryBackend::new();
        backend.put("a/b/v1.json", Bytes::from_static(b"{}")).unwrap();
        assert_eq!(
            backend.get("a/b/v1.json").unwrap(),
            Some(Bytes::from_static(b"{}"))
        );
        assert_eq!(backend.get("missing").unwrap(), None);
        assert!(backend.delete("a/b/v1.json").unwrap());
        assert!(!backend.delete("a/b/v1.json").unwrap());

        let stats = backend.stats();
        assert_eq!(stats.records, Some(0));
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.deletes, 2);
    }

    #[test]
    fn test_fault_injection() {
        let backend = MemoryRegistryBackend::new();
        backend.set_fail_writes(true);
        assert!(backend.put("k", Bytes::new()).is_err());
        backend.set_fail_writes(false);
        backend.put("k", Bytes::new()).unwrap();
        assert!(backend.contains("k"));
    }
}
