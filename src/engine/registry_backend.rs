//! Registry records stored as objects of the registry bucket

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::placement::{PlacementEngine, PlacementResult};
use crate::registry::{BackendStats, RegistryBackend, VersionSelector, REGISTRY_BUCKET};

use super::datapath::DataPath;
use super::types::PutOptions;

/// Registry backend that persists through the erasure data path
pub struct DataPathRegistryBackend {
    placement: Arc<PlacementEngine>,
    datapath: Arc<DataPath>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl DataPathRegistryBackend {
    pub fn new(placement: Arc<PlacementEngine>, datapath: Arc<DataPath>) -> Self {
        Self {
            placement,
            datapath,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    fn place(&self, key: &str) -> Result<PlacementResult> {
        self.placement.compute(REGISTRY_BUCKET, key)
    }
}

impl RegistryBackend for DataPathRegistryBackend {
    fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let placement = self.place(key)?;
        let opts = PutOptions::default().with_content_type("application/json");
        self.datapath.write(&placement, &data, &opts)?;
        debug!(key, "Stored registry record");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let placement = self.place(key)?;
        let meta = match self.datapath.read_meta(&placement, &VersionSelector::Latest) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let data = self.datapath.read_data(&placement, &meta)?;
        Ok(Some(Bytes::from(data)))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let placement = self.place(key)?;
        match self.datapath.read_meta(&placement, &VersionSelector::Latest) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }
        self.datapath.remove(&placement)?;
        Ok(true)
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            // Records are objects spread over the set; not counted
            records: None,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}
