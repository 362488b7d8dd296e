//! Consistent-hash ring of virtual nodes
//!
//! Every ACTIVE erasure set contributes `vnodes_per_set` points on a 64-bit
//! circle. A point's position is SipHash-2-4 of `pool:{p}/set:{s}/vnode:{v}`
//! under the deployment key, so every node that shares the deployment id
//! builds a bit-identical ring.

use crate::error::{Error, Result};
use crate::hash::SipKey;
use crate::topology::Topology;

/// Default number of virtual nodes per erasure set
pub const DEFAULT_VNODES_PER_SET: usize = 150;

/// A single point on the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualNode {
    /// Position on the circle
    pub hash: u64,
    pub pool_idx: usize,
    pub set_idx: usize,
}

/// Immutable sorted vnode vector for one topology generation
#[derive(Debug, Clone)]
pub struct Ring {
    nodes: Vec<VirtualNode>,
    generation: u64,
    set_count: usize,
}

impl Ring {
    /// Build the ring for every placeable set of `topology`
    pub fn build(topology: &Topology, key: &SipKey, vnodes_per_set: usize) -> Self {
        let mut nodes = Vec::new();
        let mut set_count = 0;

        for (pool_idx, pool) in topology.pools.iter().enumerate() {
            for (set_idx, set) in pool.sets.iter().enumerate() {
                if !set.is_placeable() {
                    continue;
                }
                set_count += 1;
                nodes.extend((0..vnodes_per_set).map(|v| VirtualNode {
                    hash: key.hash(vnode_label(pool_idx, set_idx, v).as_bytes()),
                    pool_idx,
                    set_idx,
                }));
            }
        }

        nodes.sort_unstable_by_key(|n| (n.hash, n.pool_idx, n.set_idx));

        Self {
            nodes,
            generation: topology.generation,
            set_count,
        }
    }

    /// First vnode clockwise from `position`, wrapping to the start
    pub fn lookup(&self, position: u64) -> Result<(usize, &VirtualNode)> {
        if self.nodes.is_empty() {
            return Err(Error::NotFound("placement ring is empty".to_string()));
        }
        let idx = self.nodes.partition_point(|n| n.hash < position);
        let idx = if idx == self.nodes.len() { 0 } else { idx };
        Ok((idx, &self.nodes[idx]))
    }

    pub fn nodes(&self) -> &[VirtualNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Topology generation the ring was built from
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of sets that contributed vnodes
    pub fn set_count(&self) -> usize {
        self.set_count
    }
}

fn vnode_label(pool_idx: usize, set_idx: usize, vnode: usize) -> String {
    format!("pool:{}/set:{}/vnode:{}", pool_idx, set_idx, vnode)
}
