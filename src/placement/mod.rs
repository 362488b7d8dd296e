//! Placement Engine
//!
//! Maps `(bucket, object)` deterministically onto one erasure set.
//!
//! ```text
//!   "{bucket}/{object}" ──SipHash-2-4(deployment key)──▶ position
//!                                                          │
//!         ┌──────────────── ring (sorted vnodes) ──────────┼───────┐
//!         │  v0   v1   v2  ...  vi ◀── first hash ≥ position│  vN   │
//!         └──────────────────────┬──────────────────────────────────┘
//!                                ▼
//!                     (pool_idx, set_idx) ──▶ topology ──▶ disks
//! ```
//!
//! The ring is rebuilt wholesale and swapped as an `Arc` under a short write
//! lock; readers keep whichever ring they already cloned.

mod ring;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::hash::SipKey;
use crate::topology::{LocalDiskTable, Topology, TopologyProvider};

pub use ring::{Ring, VirtualNode, DEFAULT_VNODES_PER_SET};

// =============================================================================
// Results
// =============================================================================

/// Where an object lives; the three disk vectors are index-aligned
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PlacementResult {
    pub pool_idx: usize,
    pub set_idx: usize,
    pub disk_count: usize,
    pub disk_paths: Vec<PathBuf>,
    pub disk_uuids: Vec<String>,
    pub disk_endpoints: Vec<String>,
    /// Topology generation the decision was made against
    pub generation: u64,
    /// Index of the chosen vnode, `None` when resolved directly
    pub vnode_index: Option<usize>,
    /// SipHash position of the object
    pub object_hash: u64,
}

impl PlacementResult {
    /// Per-disk I/O targets in set order
    pub fn targets(&self) -> Vec<DiskTarget> {
        (0..self.disk_count)
            .map(|i| DiskTarget {
                disk_path: self.disk_paths[i].clone(),
                endpoint: self.disk_endpoints[i].clone(),
                uuid: self.disk_uuids[i].clone(),
                ordinal: i,
            })
            .collect()
    }
}

/// One disk of a placement, addressed for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTarget {
    pub disk_path: PathBuf,
    pub endpoint: String,
    pub uuid: String,
    /// Position of the disk within its erasure set
    pub ordinal: usize,
}

/// Snapshot of the ring for operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RingStats {
    pub vnodes: usize,
    pub sets: usize,
    pub generation: u64,
}

// =============================================================================
// Engine
// =============================================================================

struct RingState {
    key: SipKey,
    ring: Ring,
    topology: Arc<Topology>,
}

/// Topology-aware consistent-hash placement
pub struct PlacementEngine {
    provider: Arc<dyn TopologyProvider>,
    local_disks: LocalDiskTable,
    vnodes_per_set: usize,
    state: RwLock<Option<Arc<RingState>>>,
}

impl PlacementEngine {
    pub fn new(
        provider: Arc<dyn TopologyProvider>,
        local_disks: LocalDiskTable,
        vnodes_per_set: usize,
    ) -> Self {
        Self {
            provider,
            local_disks,
            vnodes_per_set,
            state: RwLock::new(None),
        }
    }

    /// Derive the deployment key and build the first ring
    pub fn init(&self) -> Result<()> {
        let state = self.build_state()?;
        info!(
            generation = state.ring.generation(),
            vnodes = state.ring.len(),
            sets = state.ring.set_count(),
            "Placement engine initialized"
        );
        *self.state.write() = Some(Arc::new(state));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// Topology as the provider currently reports it
    pub fn topology(&self) -> Result<Arc<Topology>> {
        self.provider.current()
    }

    /// Rebuild the ring from the current topology and swap it in
    pub fn rebuild_ring(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::Uninitialized);
        }
        let state = self.build_state()?;
        info!(
            generation = state.ring.generation(),
            vnodes = state.ring.len(),
            "Placement ring rebuilt"
        );
        *self.state.write() = Some(Arc::new(state));
        Ok(())
    }

    fn build_state(&self) -> Result<RingState> {
        let topology = self.provider.current()?;
        let key = SipKey::from_deployment_id(&topology.deployment_id)?;
        let ring = Ring::build(&topology, &key, self.vnodes_per_set);
        Ok(RingState {
            key,
            ring,
            topology,
        })
    }

    /// Current ring, rebuilt first if the topology generation moved
    fn snapshot(&self) -> Result<Arc<RingState>> {
        let state = self.state.read().clone().ok_or(Error::Uninitialized)?;
        let current = self.provider.current()?.generation;
        if current == state.ring.generation() {
            return Ok(state);
        }
        debug!(
            from = state.ring.generation(),
            to = current,
            "Topology generation changed, rebuilding ring"
        );
        self.rebuild_ring()?;
        self.state.read().clone().ok_or(Error::Uninitialized)
    }

    /// Place an object on one erasure set
    #[instrument(skip(self))]
    pub fn compute(&self, bucket: &str, object: &str) -> Result<PlacementResult> {
        let state = self.snapshot()?;
        let position = state.key.object_position(bucket, object);
        let (vnode_index, vnode) = state.ring.lookup(position)?;

        let mut result = self.resolve_in(&state.topology, vnode.pool_idx, vnode.set_idx)?;
        result.vnode_index = Some(vnode_index);
        result.object_hash = position;

        debug!(
            pool = result.pool_idx,
            set = result.set_idx,
            vnode = vnode_index,
            "Computed placement"
        );
        Ok(result)
    }

    /// Resolve a known (pool, set) without consulting the ring
    pub fn resolve_set(
        &self,
        bucket: &str,
        object: &str,
        pool_idx: usize,
        set_idx: usize,
    ) -> Result<PlacementResult> {
        let state = self.snapshot()?;
        let mut result = self.resolve_in(&state.topology, pool_idx, set_idx)?;
        result.object_hash = state.key.object_position(bucket, object);
        Ok(result)
    }

    /// Placement over the local disk table alone, for when the ring cannot answer
    pub fn local_placement(&self, bucket: &str, object: &str) -> Result<PlacementResult> {
        let state = self.state.read().clone().ok_or(Error::Uninitialized)?;
        if self.local_disks.is_empty() {
            return Err(Error::NotFound("local disk table is empty".to_string()));
        }
        let disks = self.local_disks.disks();
        debug!(bucket, object, disks = disks.len(), "Using local disk table placement");
        Ok(PlacementResult {
            pool_idx: 0,
            set_idx: 0,
            disk_count: disks.len(),
            disk_paths: disks.iter().map(|d| d.path.clone()).collect(),
            disk_uuids: disks.iter().map(|d| d.uuid.clone()).collect(),
            disk_endpoints: vec![String::new(); disks.len()],
            generation: state.ring.generation(),
            vnode_index: None,
            object_hash: state.key.object_position(bucket, object),
        })
    }

    /// Object hash under the deployment key, used for on-disk names
    pub fn object_hash(&self, bucket: &str, object: &str) -> Result<u64> {
        let state = self.state.read().clone().ok_or(Error::Uninitialized)?;
        Ok(state.key.object_position(bucket, object))
    }

    fn resolve_in(
        &self,
        topology: &Topology,
        pool_idx: usize,
        set_idx: usize,
    ) -> Result<PlacementResult> {
        let set = topology.set(pool_idx, set_idx).ok_or_else(|| {
            Error::NotFound(format!(
                "pool {} set {} not in topology generation {}",
                pool_idx, set_idx, topology.generation
            ))
        })?;

        let local_only = !set.has_addresses();
        if local_only {
            debug!(
                pool = pool_idx,
                set = set_idx,
                "Set has no addresses, using local disk table"
            );
        }

        let mut disk_paths = Vec::with_capacity(set.disks.len());
        let mut disk_uuids = Vec::with_capacity(set.disks.len());
        let mut disk_endpoints = Vec::with_capacity(set.disks.len());

        let mut table_paths = HashSet::new();
        for disk in &set.disks {
            let path = if local_only {
                None
            } else {
                disk.disk_path()
            };
            let path = match path {
                Some(p) => p,
                None => {
                    let path = self
                        .local_disks
                        .resolve(&disk.uuid)
                        .map(|p| p.to_path_buf())
                        .ok_or_else(|| {
                            Error::NotFound(format!("no path known for disk {}", disk.uuid))
                        })?;
                    if !table_paths.insert(path.clone()) {
                        return Err(Error::Config(format!(
                            "local disk table maps two disks of pool {} set {} to {}",
                            pool_idx,
                            set_idx,
                            path.display()
                        )));
                    }
                    path
                }
            };
            disk_paths.push(path);
            disk_uuids.push(disk.uuid.clone());
            disk_endpoints.push(disk.endpoint.clone());
        }

        Ok(PlacementResult {
            pool_idx,
            set_idx,
            disk_count: disk_paths.len(),
            disk_paths,
            disk_uuids,
            disk_endpoints,
            generation: topology.generation,
            vnode_index: None,
            object_hash: 0,
        })
    }

    /// Vnode, set and generation counts of the installed ring
    pub fn ring_stats(&self) -> Result<RingStats> {
        let state = self.state.read().clone().ok_or(Error::Uninitialized)?;
        Ok(RingStats {
            vnodes: state.ring.len(),
            sets: state.ring.set_count(),
            generation: state.ring.generation(),
        })
    }

    /// Share of vnodes owned by each (pool, set)
    pub fn ring_distribution(&self) -> Result<Vec<((usize, usize), usize)>> {
        let state = self.state.read().clone().ok_or(Error::Uninitialized)?;
        let mut counts: std::collections::BTreeMap<(usize, usize), usize> = Default::default();
        for node in state.ring.nodes() {
            *counts.entry((node.pool_idx, node.set_idx)).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
