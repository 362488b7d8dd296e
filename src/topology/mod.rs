//! Cluster Topology
//!
//! Read-only view of the deployment layout consumed by placement:
//!
//! ```text
//! Topology (deployment_id, generation)
//!   └── Pool[]
//!         └── ErasureSet[] (state)
//!               └── Disk[] (uuid, endpoint, path, state)
//! ```
//!
//! The topology manager that owns membership lives outside this crate; it is
//! reached through [`TopologyProvider`]. [`StaticTopology`] is the in-process
//! provider used by the binary and by tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Largest erasure set the data path can address
pub const MAX_SET_DISKS: usize = 16;

// =============================================================================
// States
// =============================================================================

/// Lifecycle state of a disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskState {
    #[default]
    #[serde(alias = "ACTIVE")]
    Active,
    #[serde(alias = "DRAINING")]
    Draining,
    #[serde(alias = "REMOVED")]
    Removed,
}

/// Lifecycle state of an erasure set; only Active sets join the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetState {
    #[default]
    #[serde(alias = "ACTIVE")]
    Active,
    #[serde(alias = "DRAINING")]
    Draining,
    #[serde(alias = "REMOVED")]
    Removed,
}

// =============================================================================
// Layout
// =============================================================================

/// A single disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Stable disk identifier
    pub uuid: String,
    /// `scheme://host:port/path`, empty for disks without a network address
    #[serde(default)]
    pub endpoint: String,
    /// Mount path on the owning node; defaults to the endpoint's path component
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub state: DiskState,
}

impl Disk {
    /// Disk addressed only by a local path
    pub fn local(uuid: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            uuid: uuid.into(),
            endpoint: String::new(),
            path: Some(path.into()),
            state: DiskState::Active,
        }
    }

    /// Disk owned by the node at `endpoint`
    pub fn remote(uuid: impl Into<String>, endpoint: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            uuid: uuid.into(),
            endpoint: endpoint.into(),
            path: Some(path.into()),
            state: DiskState::Active,
        }
    }

    /// Path of the disk on its node, if the topology carries one
    pub fn disk_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        let (_, path) = split_endpoint(&self.endpoint);
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

/// A fixed group of disks holding one coded copy of each object placed on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureSet {
    #[serde(default)]
    pub state: SetState,
    pub disks: Vec<Disk>,
}

impl ErasureSet {
    pub fn new(disks: Vec<Disk>) -> Self {
        Self {
            state: SetState::Active,
            disks,
        }
    }

    /// Active sets with at least one usable disk are ring members
    pub fn is_placeable(&self) -> bool {
        self.state == SetState::Active && self.disks.iter().any(|d| d.state != DiskState::Removed)
    }

    /// Whether any disk carries a network endpoint or explicit path
    pub fn has_addresses(&self) -> bool {
        self.disks
            .iter()
            .any(|d| !d.endpoint.is_empty() || d.path.is_some())
    }
}

/// A pool of erasure sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub sets: Vec<ErasureSet>,
}

/// One version of the deployment layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Deployment UUID, the root of every placement hash key
    pub deployment_id: String,
    /// Monotonic layout version
    pub generation: u64,
    pub pools: Vec<Pool>,
}

impl Topology {
    pub fn new(deployment_id: impl Into<String>, generation: u64) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            generation,
            pools: Vec::new(),
        }
    }

    /// Append a pool
    pub fn with_pool(mut self, pool: Pool) -> Self {
        self.pools.push(pool);
        self
    }

    /// Single pool whose sets each take `disks_per_set` consecutive paths
    pub fn single_pool(
        deployment_id: impl Into<String>,
        generation: u64,
        disk_paths: &[PathBuf],
        disks_per_set: usize,
    ) -> Result<Self> {
        if disks_per_set == 0 || disk_paths.is_empty() {
            return Err(Error::InvalidArgument(
                "a pool needs at least one disk per set".to_string(),
            ));
        }
        let sets = disk_paths
            .chunks(disks_per_set)
            .enumerate()
            .map(|(set_idx, paths)| {
                ErasureSet::new(
                    paths
                        .iter()
                        .enumerate()
                        .map(|(i, p)| Disk::local(format!("disk-{}-{}", set_idx, i), p))
                        .collect(),
                )
            })
            .collect();
        Ok(Self::new(deployment_id, generation).with_pool(Pool { sets }))
    }

    /// Look up a set by its indices
    pub fn set(&self, pool_idx: usize, set_idx: usize) -> Option<&ErasureSet> {
        self.pools.get(pool_idx)?.sets.get(set_idx)
    }

    /// Total number of sets across pools
    pub fn set_count(&self) -> usize {
        self.pools.iter().map(|p| p.sets.len()).sum()
    }

    /// Structural checks that do not need the placement key
    pub fn validate(&self) -> Result<()> {
        uuid::Uuid::parse_str(self.deployment_id.trim()).map_err(|e| {
            Error::InvalidArgument(format!(
                "malformed deployment id '{}': {}",
                self.deployment_id, e
            ))
        })?;
        for (p, pool) in self.pools.iter().enumerate() {
            for (s, set) in pool.sets.iter().enumerate() {
                if set.disks.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "pool {} set {} has no disks",
                        p, s
                    )));
                }
                if set.disks.len() > MAX_SET_DISKS {
                    return Err(Error::InvalidArgument(format!(
                        "pool {} set {} has {} disks, limit is {}",
                        p,
                        s,
                        set.disks.len(),
                        MAX_SET_DISKS
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse a YAML topology document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let topology: Topology = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid topology document: {}", e)))?;
        topology.validate()?;
        Ok(topology)
    }

    /// Load a YAML topology file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }
}

/// Split `scheme://host:port/path` into (`host:port`, `/path`)
pub fn split_endpoint(endpoint: &str) -> (&str, &str) {
    let rest = match endpoint.find("://") {
        Some(idx) => &endpoint[idx + 3..],
        None => endpoint,
    };
    match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Source of the current topology
pub trait TopologyProvider: Send + Sync {
    /// Snapshot of the current layout; errors when the manager is unreachable
    fn current(&self) -> Result<Arc<Topology>>;
}

/// In-process provider holding one swappable topology
pub struct StaticTopology {
    inner: RwLock<Arc<Topology>>,
}

impl StaticTopology {
    pub fn new(topology: Topology) -> Result<Self> {
        topology.validate()?;
        Ok(Self {
            inner: RwLock::new(Arc::new(topology)),
        })
    }

    /// Install a new layout; the generation must increase
    pub fn replace(&self, next: Topology) -> Result<()> {
        next.validate()?;
        let mut guard = self.inner.write();
        if next.generation <= guard.generation {
            return Err(Error::InvalidArgument(format!(
                "topology generation must increase: current {}, offered {}",
                guard.generation, next.generation
            )));
        }
        info!(
            from = guard.generation,
            to = next.generation,
            sets = next.set_count(),
            "Topology generation changed"
        );
        *guard = Arc::new(next);
        Ok(())
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }
}

impl TopologyProvider for StaticTopology {
    fn current(&self) -> Result<Arc<Topology>> {
        Ok(self.inner.read().clone())
    }
}

// =============================================================================
// Local Disk Table
// =============================================================================

/// A disk this process can reach directly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDisk {
    pub uuid: String,
    pub path: PathBuf,
}

/// Disks known locally, used when the topology carries no addresses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalDiskTable {
    disks: Vec<LocalDisk>,
}

impl LocalDiskTable {
    pub fn new(disks: Vec<LocalDisk>) -> Self {
        Self { disks }
    }

    /// Path for a disk uuid
    pub fn resolve(&self, uuid: &str) -> Option<&Path> {
        self.disks
            .iter()
            .find(|d| d.uuid == uuid)
            .map(|d| d.path.as_path())
    }

    pub fn disks(&self) -> &[LocalDisk] {
        &self.disks
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.disks.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = "6f1c2a9e-3b4d-4e5f-8a7b-1c2d3e4f5a6b";

    #[test]
    fn test_split_endpoint() {
        assert_eq!(split_endpoint("http://node1:9000/mnt/d1"), ("node1:9000", "/mnt/d1"));
        assert_eq!(split_endpoint("node1:9000"), ("node1:9000", ""));
        assert_eq!(split_endpoint("https://node2:443"), ("node2:443", ""));
        assert_eq!(split_endpoint(""), ("", ""));
    }

    #[test]
    fn test_disk_path_from_endpoint() {
        let disk = Disk {
            uuid: "d1".into(),
            endpoint: "http://node1:9000/mnt/d1".into(),
            path: None,
            state: DiskState::Active,
        };
        assert_eq!(disk.disk_path(), Some(PathBuf::from("/mnt/d1")));

        let bare = Disk {
            uuid: "d2".into(),
            endpoint: String::new(),
            path: None,
            state: DiskState::Active,
        };
        assert_eq!(bare.disk_path(), None);
    }

    #[test]
    fn test_single_pool_layout() {
        let paths: Vec<PathBuf> = (0..12).map(|i| PathBuf::from(format!("/d{}", i))).collect();
        let topology = Topology::single_pool(DEPLOYMENT, 1, &paths, 6).unwrap();
        assert_eq!(topology.set_count(), 2);
        assert_eq!(topology.set(0, 1).unwrap().disks[0].path, Some(PathBuf::from("/d6")));
        assert!(topology.set(1, 0).is_none());
    }

    #[test]
    fn test_set_placeability() {
        let mut set = ErasureSet::new(vec![Disk::local("a", "/a")]);
        assert!(set.is_placeable());
        set.state = SetState::Draining;
        assert!(!set.is_placeable());
        set.state = SetState::Active;
        set.disks[0].state = DiskState::Removed;
        assert!(!set.is_placeable());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
deployment_id: 6f1c2a9e-3b4d-4e5f-8a7b-1c2d3e4f5a6b
generation: 3
pools:
  - sets:
      - state: ACTIVE
        disks:
          - uuid: d0
            endpoint: http://node1:9000/mnt/d0
          - uuid: d1
            endpoint: http://node2:9000/mnt/d1
            state: draining
"#;
        let topology = Topology::from_yaml(yaml).unwrap();
        assert_eq!(topology.generation, 3);
        let set = topology.set(0, 0).unwrap();
        assert_eq!(set.disks[1].state, DiskState::Draining);
        assert!(set.has_addresses());
    }

    #[test]
    fn test_malformed_deployment_rejected() {
        let topology = Topology::new("nope", 1);
        assert!(matches!(topology.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_oversized_set_rejected() {
        let disks = (0..17).map(|i| Disk::local(format!("d{}", i), format!("/d{}", i))).collect();
        let topology = Topology::new(DEPLOYMENT, 1).with_pool(Pool {
            sets: vec![ErasureSet::new(disks)],
        });
        assert!(matches!(topology.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_static_topology_generation_must_increase() {
        let provider = StaticTopology::new(Topology::new(DEPLOYMENT, 5)).unwrap();
        assert!(provider.replace(Topology::new(DEPLOYMENT, 5)).is_err());
        assert!(provider.replace(Topology::new(DEPLOYMENT, 4)).is_err());
        provider.replace(Topology::new(DEPLOYMENT, 6)).unwrap();
        assert_eq!(provider.current().unwrap().generation, 6);
    }

    #[test]
    fn test_local_disk_table_resolution() {
        let table = LocalDiskTable::new(vec![
            LocalDisk { uuid: "a".into(), path: "/a".into() },
            LocalDisk { uuid: "b".into(), path: "/b".into() },
        ]);
        assert_eq!(table.resolve("b"), Some(Path::new("/b")));
        assert_eq!(table.resolve("a"), Some(Path::new("/a")));
        // Unknown disks never borrow another disk's path
        assert_eq!(table.resolve("zzz"), None);
    }
}
