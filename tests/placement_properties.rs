//! Placement Properties
//!
//! Determinism, ring coverage, load balance and minimal movement of the
//! consistent-hash placement.

use std::collections::HashMap;
use std::sync::Arc;

use shardvault::hash::SipKey;
use shardvault::placement::{PlacementEngine, Ring};
use shardvault::topology::{Disk, ErasureSet, LocalDiskTable, Pool, SetState};
use shardvault::{StaticTopology, Topology};

const DEPLOYMENT: &str = "3f2a7c1e-9b4d-4c8a-a6e5-0d1b2c3e4f50";

fn erasure_set(idx: usize) -> ErasureSet {
    ErasureSet::new(
        (0..6)
            .map(|d| Disk::local(format!("set{}-disk{}", idx, d), format!("/srv/set{}/disk{}", idx, d)))
            .collect(),
    )
}

fn topology(sets: usize, generation: u64) -> Topology {
    Topology::new(DEPLOYMENT, generation).with_pool(Pool {
        sets: (0..sets).map(erasure_set).collect(),
    })
}

fn engine(provider: Arc<StaticTopology>) -> PlacementEngine {
    let engine = PlacementEngine::new(provider, LocalDiskTable::default(), 150);
    engine.init().expect("init placement");
    engine
}

fn names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("dir-{}/object-{:05}.bin", i % 17, i)).collect()
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_independent_engines_agree() {
    let a = engine(Arc::new(StaticTopology::new(topology(4, 1)).unwrap()));
    let b = engine(Arc::new(StaticTopology::new(topology(4, 1)).unwrap()));

    for name in names(500) {
        let pa = a.compute("bucket", &name).unwrap();
        let pb = b.compute("bucket", &name).unwrap();
        assert_eq!(pa, pb, "placement of {} differs", name);
    }
}

#[test]
fn test_bucket_is_part_of_the_key() {
    let engine = engine(Arc::new(StaticTopology::new(topology(4, 1)).unwrap()));
    let a = engine.object_hash("bucket-a", "same-name").unwrap();
    let b = engine.object_hash("bucket-b", "same-name").unwrap();
    assert_ne!(a, b);
}

// =============================================================================
// Ring coverage
// =============================================================================

#[test]
fn test_ring_wraps_around() {
    let key = SipKey::from_deployment_id(DEPLOYMENT).unwrap();
    let ring = Ring::build(&topology(3, 1), &key, 150);
    assert_eq!(ring.len(), 450);

    let last = ring.nodes()[ring.len() - 1];
    if last.hash < u64::MAX {
        let (idx, node) = ring.lookup(last.hash + 1).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(*node, ring.nodes()[0]);
        assert_eq!(ring.lookup(u64::MAX).unwrap().0, 0);
    }
    assert_eq!(ring.lookup(0).unwrap().0, 0);

    // Every vnode owns its own position
    for (i, node) in ring.nodes().iter().enumerate().step_by(37) {
        let (idx, found) = ring.lookup(node.hash).unwrap();
        assert_eq!(found.hash, node.hash);
        assert!(idx <= i);
    }
}

#[test]
fn test_only_active_sets_join_the_ring() {
    let mut topo = topology(3, 1);
    topo.pools[0].sets[1].state = SetState::Draining;

    let key = SipKey::from_deployment_id(DEPLOYMENT).unwrap();
    let ring = Ring::build(&topo, &key, 150);
    assert_eq!(ring.len(), 300);
    assert_eq!(ring.set_count(), 2);
    assert!(ring.nodes().iter().all(|n| n.set_idx != 1));
}

// =============================================================================
// Load balance
// =============================================================================

#[test]
fn test_load_is_balanced_across_sets() {
    let sets = 4;
    let engine = engine(Arc::new(StaticTopology::new(topology(sets, 1)).unwrap()));

    let mut counts: HashMap<usize, usize> = HashMap::new();
    let total = 10_000;
    for name in names(total) {
        let placed = engine.compute("balance", &name).unwrap();
        *counts.entry(placed.set_idx).or_default() += 1;
    }

    assert_eq!(counts.len(), sets);
    let mean = total as f64 / sets as f64;
    for (set, count) in &counts {
        let deviation = (*count as f64 - mean).abs() / mean;
        assert!(
            deviation <= 0.5,
            "set {} holds {} objects, mean {:.0}",
            set,
            count,
            mean
        );
    }
}

// =============================================================================
// Minimal movement
// =============================================================================

#[test]
fn test_adding_a_set_moves_few_objects() {
    let provider = Arc::new(StaticTopology::new(topology(4, 1)).unwrap());
    let engine = engine(provider.clone());

    let objects = names(1_000);
    let before: Vec<usize> = objects
        .iter()
        .map(|o| engine.compute("movement", o).unwrap().set_idx)
        .collect();

    provider.replace(topology(5, 2)).unwrap();

    let mut moved = 0;
    for (object, old_set) in objects.iter().zip(&before) {
        let placed = engine.compute("movement", object).unwrap();
        assert_eq!(placed.generation, 2);
        if placed.set_idx != *old_set {
            // Objects only ever move onto the new set
            assert_eq!(placed.set_idx, 4, "{} moved between old sets", object);
            moved += 1;
        }
    }

    let fraction = moved as f64 / objects.len() as f64;
    assert!(
        (0.05..=0.35).contains(&fraction),
        "moved fraction {:.3} outside expected range",
        fraction
    );
}

#[test]
fn test_stale_generation_is_refused() {
    let provider = StaticTopology::new(topology(2, 5)).unwrap();
    assert!(provider.replace(topology(3, 5)).is_err());
    assert!(provider.replace(topology(3, 4)).is_err());
    assert_eq!(provider.generation(), 5);
    provider.replace(topology(3, 6)).unwrap();
    assert_eq!(provider.generation(), 6);
}
