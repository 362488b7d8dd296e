//! Object Engine
//!
//! Put/Get/Delete orchestration over placement, chunk transport, the
//! location registry and the metadata cache.
//!
//! ```text
//!   put_object ──▶ compute ──▶ DataPath::write ──▶ registry.record ──▶ metadata cache
//!                                                   └─▶ retire superseded version
//!
//!   get_object ──▶ registry hint ─┬─▶ resolve_set
//!                                 └─▶ compute ──▶ local disk table
//!                      ──▶ metadata cache / DataPath::read_meta ──▶ DataPath::read_data
//!
//!   delete_object ──▶ locate ──▶ DataPath::remove ──▶ invalidate ──▶ registry.delete
//! ```
//!
//! All shared state lives in an explicit [`EngineContext`]; several engines
//! can run in one process, each with its own disks, caches and metrics.

mod datapath;
mod registry_backend;
pub mod status;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::io::ParallelIo;
use crate::meta::{MetadataCache, XlMeta};
use crate::metrics::EngineMetrics;
use crate::placement::{PlacementEngine, PlacementResult};
use crate::registry::{
    validate_version_id, LocationRegistry, ObjectLocation, RegistryBackend, VersionSelector,
    REGISTRY_BUCKET,
};
use crate::topology::TopologyProvider;
use crate::transport::{ChunkTransport, Locality, RpcClient};

pub use datapath::{DataPath, WriteOutcome};
pub use registry_backend::DataPathRegistryBackend;
pub use status::{ComponentCheck, EngineStatus, HealthStatus, StatusTracker};
pub use types::{
    validate_names, MetadataReadPolicy, ObjectInfo, ObjectStat, PutOptions, DEFAULT_CONTENT_TYPE,
};

// =============================================================================
// Context
// =============================================================================

/// Everything one engine instance shares between operations
pub struct EngineContext {
    pub topology: Arc<dyn TopologyProvider>,
    pub placement: Arc<PlacementEngine>,
    pub datapath: Arc<DataPath>,
    pub registry: Arc<LocationRegistry>,
    pub metadata_cache: Arc<MetadataCache>,
    pub metrics: Arc<EngineMetrics>,
    pub status: Arc<StatusTracker>,
}

impl EngineContext {
    /// Wire an engine from configuration
    ///
    /// Without an explicit `registry_backend`, registry records are stored
    /// as objects of the registry bucket through the engine's own data path.
    pub fn build(
        config: &EngineConfig,
        topology: Arc<dyn TopologyProvider>,
        rpc: Option<Arc<dyn RpcClient>>,
        registry_backend: Option<Arc<dyn RegistryBackend>>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new()?);
        let status = Arc::new(StatusTracker::new());
        let placement = Arc::new(PlacementEngine::new(
            topology.clone(),
            config.local_disk_table(),
            config.ring.vnodes_per_set,
        ));

        let transport = ChunkTransport::new(
            Locality::new(config.local_endpoint.as_deref()),
            rpc,
            config.rpc.timeouts(),
            config.rpc.binary_transport,
        );
        let datapath = Arc::new(DataPath::new(
            transport,
            ParallelIo::new(config.max_fanout),
            config.erasure,
            config.inline_threshold,
            metrics.clone(),
            status.clone(),
        )?);

        let backend = match registry_backend {
            Some(backend) => backend,
            None => Arc::new(DataPathRegistryBackend::new(
                placement.clone(),
                datapath.clone(),
            )),
        };
        let registry = Arc::new(LocationRegistry::new(
            backend,
            config.registry_cache.capacity,
            config.registry_cache.ttl(),
        ));
        let metadata_cache = Arc::new(MetadataCache::new(
            config.metadata_cache.capacity,
            config.metadata_cache.ttl(),
        ));

        Ok(Self {
            topology,
            placement,
            datapath,
            registry,
            metadata_cache,
            metrics,
            status,
        })
    }
}

// =============================================================================
// Engine
// =============================================================================

/// S3-style object API over erasure-coded sets
pub struct ObjectEngine {
    ctx: EngineContext,
}

impl ObjectEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Build the context and initialize placement
    pub fn open(
        config: &EngineConfig,
        topology: Arc<dyn TopologyProvider>,
        rpc: Option<Arc<dyn RpcClient>>,
    ) -> Result<Self> {
        let engine = Self::new(EngineContext::build(config, topology, rpc, None)?);
        engine.init()?;
        Ok(engine)
    }

    pub fn init(&self) -> Result<()> {
        self.ctx.placement.init()?;
        info!(
            data = self.ctx.datapath.erasure().data_shards,
            parity = self.ctx.datapath.erasure().parity_shards,
            inline_threshold = self.ctx.datapath.inline_threshold(),
            "Object engine ready"
        );
        Ok(())
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn placement(&self) -> &PlacementEngine {
        &self.ctx.placement
    }

    fn timed<T>(&self, op: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let result = f();
        self.ctx.metrics.observe(op, &result, start.elapsed());
        result
    }

    // -------------------------------------------------------------------------
    // Put
    // -------------------------------------------------------------------------

    /// Store an object, replacing any previous version
    #[instrument(skip(self, data, opts), fields(len = data.len()))]
    pub fn put_object(&self, bucket: &str, object: &str, data: &[u8], opts: &PutOptions) -> Result<ObjectInfo> {
        self.timed("put", || self.put_inner(bucket, object, data, opts))
    }

    fn put_inner(&self, bucket: &str, object: &str, data: &[u8], opts: &PutOptions) -> Result<ObjectInfo> {
        validate_names(bucket, object)?;
        if let Some(version_id) = &opts.version_id {
            validate_version_id(version_id)?;
        }
        let placement = self.ctx.placement.compute(bucket, object)?;
        let previous = self.previous_location(bucket, object);

        let written = self.ctx.datapath.write(&placement, data, opts)?;
        let meta = written.meta;
        let version_id = meta.versioning.version_id.clone();

        if bucket != REGISTRY_BUCKET {
            let location = ObjectLocation {
                bucket: bucket.to_string(),
                object: object.to_string(),
                version_id: version_id.clone(),
                pool_idx: placement.pool_idx,
                set_idx: placement.set_idx,
                disk_count: placement.disk_count,
                disk_idxs: written.disk_idxs,
                generation: placement.generation,
                mod_time: meta.stat.mod_time,
                size: meta.stat.size,
            };
            self.ctx.registry.record(&location)?;
        }

        // The previous version's data is gone; drop everything that still names it
        let cached = self
            .ctx
            .metadata_cache
            .get(bucket, object, &VersionSelector::Latest)
            .map(|m| m.versioning.version_id);
        let recorded = previous.as_ref().map(|p| p.version_id.clone());
        for old in [cached, recorded].into_iter().flatten() {
            if old != version_id {
                self.ctx
                    .metadata_cache
                    .invalidate(bucket, object, &VersionSelector::Id(old));
            }
        }
        self.ctx.metadata_cache.put(bucket, object, &meta);
        if let Some(previous) = previous {
            self.retire(&previous, &placement, &version_id);
        }

        debug!(
            version = %version_id,
            pool = placement.pool_idx,
            set = placement.set_idx,
            "Object stored"
        );
        Ok(ObjectInfo::from_meta(bucket, object, &meta))
    }

    /// Latest registry record of an object, if any
    fn previous_location(&self, bucket: &str, object: &str) -> Option<ObjectLocation> {
        if bucket == REGISTRY_BUCKET {
            return None;
        }
        match self.ctx.registry.lookup(bucket, object, &VersionSelector::Latest) {
            Ok(location) => Some(location),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(bucket, object, error = %e, "Registry lookup failed before put");
                None
            }
        }
    }

    /// Forget a superseded version: its record, and its copy on a set the object left
    fn retire(&self, previous: &ObjectLocation, placement: &PlacementResult, version_id: &str) {
        let (bucket, object) = (previous.bucket.as_str(), previous.object.as_str());

        if (previous.pool_idx, previous.set_idx) != (placement.pool_idx, placement.set_idx) {
            match self
                .ctx
                .placement
                .resolve_set(bucket, object, previous.pool_idx, previous.set_idx)
            {
                Ok(old) => match self.ctx.datapath.remove(&old) {
                    Ok(outcome) => debug!(
                        pool = previous.pool_idx,
                        set = previous.set_idx,
                        deleted = outcome.deleted,
                        "Removed copy left on the previous set"
                    ),
                    Err(e) => warn!(error = %e, "Previous set copy not removed"),
                },
                Err(e) => debug!(error = %e, "Previous set no longer resolvable"),
            }
        }

        if previous.version_id != version_id {
            self.ctx.registry.delete(bucket, object, &previous.selector());
        }
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Placement of an object: registry hint, then the ring, then local disks
    fn locate(
        &self,
        bucket: &str,
        object: &str,
        version: &VersionSelector,
    ) -> Result<(PlacementResult, Option<ObjectLocation>)> {
        let location = if bucket == REGISTRY_BUCKET {
            None
        } else {
            match self.ctx.registry.lookup(bucket, object, version) {
                Ok(location) => Some(location),
                Err(e) if e.is_not_found() => None,
                Err(e) => {
                    warn!(bucket, object, error = %e, "Registry lookup failed, computing placement");
                    None
                }
            }
        };

        if let Some(hint) = &location {
            match self
                .ctx
                .placement
                .resolve_set(bucket, object, hint.pool_idx, hint.set_idx)
            {
                Ok(placement) => return Ok((placement, location)),
                Err(e) => debug!(error = %e, "Registry hint is stale, computing placement"),
            }
        }

        match self.ctx.placement.compute(bucket, object) {
            Ok(placement) => Ok((placement, location)),
            Err(e) => match self.ctx.placement.local_placement(bucket, object) {
                Ok(placement) => {
                    debug!(error = %e, "Ring placement failed, using local disk table");
                    Ok((placement, location))
                }
                Err(_) => Err(e),
            },
        }
    }

    /// Metadata document, from the cache when possible
    fn load_meta(
        &self,
        bucket: &str,
        object: &str,
        version: &VersionSelector,
        placement: &PlacementResult,
    ) -> Result<(XlMeta, bool)> {
        if let Some(meta) = self.ctx.metadata_cache.get(bucket, object, version) {
            return Ok((meta, true));
        }
        let meta = self.ctx.datapath.read_meta(placement, version)?;
        self.ctx.metadata_cache.put(bucket, object, &meta);
        Ok((meta, false))
    }

    fn invalidate_meta(&self, bucket: &str, object: &str, version: &VersionSelector, meta: Option<&XlMeta>) {
        self.ctx.metadata_cache.invalidate(bucket, object, version);
        self.ctx
            .metadata_cache
            .invalidate(bucket, object, &VersionSelector::Latest);
        if let Some(meta) = meta {
            self.ctx.metadata_cache.invalidate(
                bucket,
                object,
                &VersionSelector::Id(meta.versioning.version_id.clone()),
            );
        }
    }

    // -------------------------------------------------------------------------
    // Get / Head / Stat
    // -------------------------------------------------------------------------

    /// Read an object's attributes and payload
    #[instrument(skip(self))]
    pub fn get_object(&self, bucket: &str, object: &str, version: &VersionSelector) -> Result<(ObjectInfo, Vec<u8>)> {
        self.timed("get", || self.get_inner(bucket, object, version))
    }

    fn get_inner(&self, bucket: &str, object: &str, version: &VersionSelector) -> Result<(ObjectInfo, Vec<u8>)> {
        validate_names(bucket, object)?;
        let (placement, _) = self.locate(bucket, object, version)?;
        let (meta, cached) = self.load_meta(bucket, object, version, &placement)?;

        match self.ctx.datapath.read_data(&placement, &meta) {
            Ok(data) => Ok((ObjectInfo::from_meta(bucket, object, &meta), data)),
            Err(e) => {
                self.invalidate_meta(bucket, object, version, Some(&meta));
                if !cached {
                    return Err(e);
                }
                // Another writer may have replaced the object; retry from disk once
                debug!(error = %e, "Cached metadata did not match disks, rereading");
                let meta = self.ctx.datapath.read_meta(&placement, version)?;
                let data = self.ctx.datapath.read_data(&placement, &meta)?;
                self.ctx.metadata_cache.put(bucket, object, &meta);
                Ok((ObjectInfo::from_meta(bucket, object, &meta), data))
            }
        }
    }

    /// Attributes only
    pub fn head_object(&self, bucket: &str, object: &str, version: &VersionSelector) -> Result<ObjectInfo> {
        self.timed("head", || {
            validate_names(bucket, object)?;
            let (placement, _) = self.locate(bucket, object, version)?;
            let (meta, _) = self.load_meta(bucket, object, version, &placement)?;
            Ok(ObjectInfo::from_meta(bucket, object, &meta))
        })
    }

    /// Attributes plus placement and erasure layout
    pub fn stat_object(&self, bucket: &str, object: &str, version: &VersionSelector) -> Result<ObjectStat> {
        self.timed("stat", || {
            validate_names(bucket, object)?;
            let (placement, location) = self.locate(bucket, object, version)?;
            let (meta, _) = self.load_meta(bucket, object, version, &placement)?;
            Ok(ObjectStat {
                info: ObjectInfo::from_meta(bucket, object, &meta),
                location,
                placement,
                erasure: meta.erasure,
            })
        })
    }

    // -------------------------------------------------------------------------
    // Delete
    // -------------------------------------------------------------------------

    /// Remove an object; NotFound when there is nothing to remove
    #[instrument(skip(self))]
    pub fn delete_object(&self, bucket: &str, object: &str, version: &VersionSelector) -> Result<()> {
        self.timed("delete", || self.delete_inner(bucket, object, version))
    }

    fn delete_inner(&self, bucket: &str, object: &str, version: &VersionSelector) -> Result<()> {
        validate_names(bucket, object)?;
        let (placement, location) = self.locate(bucket, object, version)?;

        match self.ctx.datapath.read_meta(&placement, version) {
            Ok(meta) => {
                let outcome = self.ctx.datapath.remove(&placement)?;
                debug!(
                    deleted = outcome.deleted,
                    missing = outcome.missing,
                    failed = outcome.errors.len(),
                    "Object data removed"
                );
                self.invalidate_meta(bucket, object, version, Some(&meta));
            }
            Err(e) if e.is_not_found() => {
                // Every reachable disk agrees the data is gone; a record saying otherwise is stale
                if location.is_some() && bucket != REGISTRY_BUCKET {
                    debug!(bucket, object, %version, "Dropping registry record without data");
                    self.ctx.registry.delete(bucket, object, version);
                }
                self.invalidate_meta(bucket, object, version, None);
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        if bucket != REGISTRY_BUCKET {
            self.ctx.registry.delete(bucket, object, version);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Operator-visible health snapshot
    pub fn status(&self) -> EngineStatus {
        let mut checks = Vec::with_capacity(4);

        let ring = self.ctx.placement.ring_stats().ok();
        match ring {
            None => checks.push(ComponentCheck::unhealthy("placement", "ring not initialized")),
            Some(stats) if stats.vnodes == 0 => {
                checks.push(ComponentCheck::unhealthy("placement", "no active erasure sets"))
            }
            Some(_) => checks.push(ComponentCheck::healthy("placement")),
        }

        let topology_generation = match self.ctx.topology.current() {
            Ok(topology) => {
                checks.push(ComponentCheck::healthy("topology"));
                Some(topology.generation)
            }
            Err(e) => {
                checks.push(ComponentCheck::unhealthy("topology", e.to_string()));
                None
            }
        };

        let degraded_writes = self.ctx.status.degraded_writes();
        if degraded_writes > 0 {
            checks.push(ComponentCheck::degraded(
                "redundancy",
                format!("{} object(s) stored on a single disk", degraded_writes),
            ));
        } else {
            checks.push(ComponentCheck::healthy("redundancy"));
        }

        let registry_cache = self.ctx.registry.stats();
        let metadata_cache = self.ctx.metadata_cache.stats();
        self.ctx.metrics.update_cache("registry", &registry_cache);
        self.ctx.metrics.update_cache("metadata", &metadata_cache);

        EngineStatus {
            status: EngineStatus::overall(&checks),
            checks,
            ring,
            topology_generation,
            degraded_writes,
            last_degraded_write: self.ctx.status.last_degraded_write(),
            registry_cache,
            metadata_cache,
            uptime_seconds: self.ctx.status.uptime().as_secs(),
        }
    }

    /// Prometheus text exposition of this engine's metrics
    pub fn metrics_text(&self) -> Result<String> {
        self.ctx
            .metrics
            .update_cache("registry", &self.ctx.registry.stats());
        self.ctx
            .metrics
            .update_cache("metadata", &self.ctx.metadata_cache.stats());
        self.ctx.metrics.render()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistryBackend;
    use crate::topology::{StaticTopology, Topology};
    use assert_matches::assert_matches;
    use std::path::PathBuf;

    const DEPLOYMENT: &str = "0b6d2f8e-4a1c-4f3e-9d2b-7c5a1e3f9b20";

    struct Harness {
        _root: tempfile::TempDir,
        backend: Arc<MemoryRegistryBackend>,
        engine: ObjectEngine,
    }

    fn harness(disks: usize, inline_threshold: usize) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..disks).map(|i| root.path().join(format!("d{}", i))).collect();
        let topology = Topology::single_pool(DEPLOYMENT, 1, &paths, disks).unwrap();
        let provider = Arc::new(StaticTopology::new(topology).unwrap());

        let config = EngineConfig {
            inline_threshold,
            ..Default::default()
        };
        let backend = Arc::new(MemoryRegistryBackend::new());
        let ctx = EngineContext::build(&config, provider, None, Some(backend.clone())).unwrap();
        let engine = ObjectEngine::new(ctx);
        engine.init().unwrap();
        Harness {
            _root: root,
            backend,
            engine,
        }
    }

    #[test]
    fn test_put_get_delete() {
        let h = harness(6, 64);
        let payload = vec![3u8; 500];
        let info = h
            .engine
            .put_object("b", "o", &payload, &PutOptions::default())
            .unwrap();
        assert_eq!(info.size, 500);
        assert!(!info.is_inline);
        assert!(h.backend.contains("b/o/latest.json"));

        let (got, data) = h.engine.get_object("b", "o", &VersionSelector::Latest).unwrap();
        assert_eq!(data, payload);
        assert_eq!(got.etag, info.etag);

        h.engine.delete_object("b", "o", &VersionSelector::Latest).unwrap();
        assert!(h.backend.is_empty());
        assert_matches!(
            h.engine.get_object("b", "o", &VersionSelector::Latest),
            Err(Error::NotFound(_))
        );
        assert_matches!(
            h.engine.delete_object("b", "o", &VersionSelector::Latest),
            Err(Error::NotFound(_))
        );
    }

    #[test]
    fn test_invalid_names() {
        let h = harness(6, 64);
        assert_matches!(
            h.engine.put_object("", "o", b"x", &PutOptions::default()),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            h.engine.get_object("b", "", &VersionSelector::Latest),
            Err(Error::InvalidArgument(_))
        );
        assert_eq!(h.engine.context().metrics.op_count("put", "invalid_argument"), 1);
    }

    #[test]
    fn test_overwrite_returns_new_version() {
        let h = harness(6, 64);
        h.engine
            .put_object("b", "o", b"first", &PutOptions::default().with_version_id("v1"))
            .unwrap();
        h.engine.get_object("b", "o", &VersionSelector::Latest).unwrap();
        h.engine
            .put_object("b", "o", b"second", &PutOptions::default().with_version_id("v2"))
            .unwrap();

        let (info, data) = h.engine.get_object("b", "o", &VersionSelector::Latest).unwrap();
        assert_eq!(info.version_id, "v2");
        assert_eq!(data, b"second");
        assert!(h
            .engine
            .get_object("b", "o", &VersionSelector::Id("v1".into()))
            .unwrap_err()
            .is_not_found());
        assert!(!h.backend.contains("b/o/v1.json"));
        assert!(h.backend.contains("b/o/v2.json"));
    }

    #[test]
    fn test_delete_drops_record_without_data() {
        let h = harness(6, 64);
        h.engine
            .put_object("b", "o", b"kept", &PutOptions::default().with_version_id("v2"))
            .unwrap();
        let stat = h.engine.stat_object("b", "o", &VersionSelector::Latest).unwrap();
        let current = stat.location.unwrap();
        let stale = ObjectLocation {
            version_id: "v0".into(),
            ..current.clone()
        };
        let registry = &h.engine.context().registry;
        registry.record(&stale).unwrap();
        registry.record(&current).unwrap();
        assert!(h.backend.contains("b/o/v0.json"));

        assert_matches!(
            h.engine.delete_object("b", "o", &VersionSelector::Id("v0".into())),
            Err(Error::NotFound(_))
        );
        assert!(!h.backend.contains("b/o/v0.json"));
        assert!(h.backend.contains("b/o/latest.json"));
        assert_matches!(
            registry.lookup("b", "o", &VersionSelector::Id("v0".into())),
            Err(Error::NotFound(_))
        );

        let (info, data) = h.engine.get_object("b", "o", &VersionSelector::Latest).unwrap();
        assert_eq!(info.version_id, "v2");
        assert_eq!(data, b"kept");
    }

    #[test]
    fn test_reserved_version_id_rejected_before_write() {
        let h = harness(6, 64);
        assert_matches!(
            h.engine
                .put_object("b", "o", &[1u8; 300], &PutOptions::default().with_version_id("latest")),
            Err(Error::InvalidArgument(_))
        );
        assert!(h.backend.is_empty());
        assert_matches!(
            h.engine.head_object("b", "o", &VersionSelector::Latest),
            Err(Error::NotFound(_))
        );
    }

    #[test]
    fn test_head_and_stat() {
        let h = harness(6, 64);
        let opts = PutOptions::default()
            .with_content_type("text/plain")
            .with_user_metadata("team", "storage");
        h.engine.put_object("b", "doc.txt", &[1u8; 200], &opts).unwrap();

        let info = h.engine.head_object("b", "doc.txt", &VersionSelector::Latest).unwrap();
        assert_eq!(info.content_type, "text/plain");
        assert_eq!(info.user_metadata.get("team").map(String::as_str), Some("storage"));

        let stat = h.engine.stat_object("b", "doc.txt", &VersionSelector::Latest).unwrap();
        assert_eq!(stat.erasure.data, 4);
        assert_eq!(stat.erasure.parity, 2);
        assert_eq!(stat.placement.disk_count, 6);
        assert_eq!(stat.location.unwrap().disk_idxs, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_status_reports_degraded_writes() {
        let h = harness(3, 16);
        assert!(h.engine.status().status.is_healthy());

        h.engine
            .put_object("b", "big", &[5u8; 4096], &PutOptions::default())
            .unwrap();
        let status = h.engine.status();
        assert_eq!(status.status, HealthStatus::Degraded);
        assert_eq!(status.degraded_writes, 1);
        assert!(status.last_degraded_write.is_some());
        assert_eq!(status.topology_generation, Some(1));

        let (_, data) = h.engine.get_object("b", "big", &VersionSelector::Latest).unwrap();
        assert_eq!(data, vec![5u8; 4096]);
    }

    #[test]
    fn test_metrics_text() {
        let h = harness(6, 64);
        h.engine.put_object("b", "o", b"x", &PutOptions::default()).unwrap();
        let text = h.engine.metrics_text().unwrap();
        assert!(text.contains("shardvault_object_ops_total{op=\"put\",outcome=\"ok\"} 1"));
    }
}
