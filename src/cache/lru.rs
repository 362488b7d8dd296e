//! Bounded LRU map with per-entry TTL
//!
//! # Design
//!
//! - Chained hash table with `max(capacity / 10, 1)` buckets; bucket index is
//!   xxHash-64 of the key under a per-cache seed
//! - Entries live in a slab and are double-linked into one global LRU list
//!   (head = most recent, tail = next victim)
//! - One `parking_lot::RwLock`: probes take the shared lock, the LRU touch
//!   and every mutation take the exclusive lock
//! - An expired entry is a miss whether or not it has been reaped yet

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use crate::hash::xxhash64;

const BUCKET_SEED: u64 = 0x5348_4152_4456_4c54;

struct Node<V> {
    key: String,
    value: V,
    expires_at: Instant,
    bucket: usize,
    /// Next entry in the same hash bucket
    chain_next: Option<usize>,
    /// LRU neighbours
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<V> {
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    buckets: Vec<Option<usize>>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<V> Inner<V> {
    fn new(bucket_count: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: vec![None; bucket_count],
            head: None,
            tail: None,
            len: 0,
        }
    }

    fn node(&self, idx: usize) -> Option<&Node<V>> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<V>> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn find(&self, bucket: usize, key: &str) -> Option<usize> {
        let mut cur = self.buckets[bucket];
        while let Some(idx) = cur {
            let node = self.node(idx)?;
            if node.key == key {
                return Some(idx);
            }
            cur = node.chain_next;
        }
        None
    }

    /// Unlink from the LRU list
    fn detach(&mut self, idx: usize) {
        let Some((prev, next)) = self.node(idx).map(|n| (n.prev, n.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.node_mut(idx) {
            n.prev = None;
            n.next = None;
        }
    }

    /// Link at the most-recent end of the LRU list
    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(n) = self.node_mut(idx) {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.node_mut(h) {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.detach(idx);
            self.attach_front(idx);
        }
    }

    /// Unlink from its hash bucket chain
    fn unchain(&mut self, idx: usize) {
        let Some((bucket, next)) = self.node(idx).map(|n| (n.bucket, n.chain_next)) else {
            return;
        };
        if self.buckets[bucket] == Some(idx) {
            self.buckets[bucket] = next;
            return;
        }
        let mut cur = self.buckets[bucket];
        while let Some(c) = cur {
            let Some(node) = self.node_mut(c) else {
                return;
            };
            if node.chain_next == Some(idx) {
                node.chain_next = next;
                return;
            }
            cur = node.chain_next;
        }
    }

    fn take(&mut self, idx: usize) -> Option<Node<V>> {
        self.detach(idx);
        self.unchain(idx);
        let node = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        self.len -= 1;
        Some(node)
    }

    fn push(&mut self, mut node: Node<V>) -> usize {
        node.chain_next = self.buckets[node.bucket];
        let bucket = node.bucket;
        let idx = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(node);
                i
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.buckets[bucket] = Some(idx);
        self.attach_front(idx);
        self.len += 1;
        idx
    }

    fn clear(&mut self) {
        let bucket_count = self.buckets.len();
        *self = Self::new(bucket_count);
    }
}

/// Counters reported by [`LruCache::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit ratio (0.0 - 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, TTL-aware LRU cache keyed by strings
pub struct LruCache<V> {
    inner: RwLock<Inner<V>>,
    /// Maximum number of entries
    capacity: usize,
    /// Lifetime of an entry from its last insert
    ttl: Duration,
    bucket_count: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> LruCache<V> {
    /// Create a cache holding at most `capacity` entries for `ttl` each
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        let bucket_count = (capacity / 10).max(1);
        Self {
            inner: RwLock::new(Inner::new(bucket_count)),
            capacity,
            ttl,
            bucket_count,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn bucket_of(&self, key: &str) -> usize {
        (xxhash64(BUCKET_SEED, key.as_bytes()) % self.bucket_count as u64) as usize
    }

    /// Clone of a live entry, promoting it to most recently used
    pub fn get(&self, key: &str) -> Option<V> {
        let bucket = self.bucket_of(key);
        let now = Instant::now();

        // Probe under the shared lock
        let probe = {
            let inner = self.inner.read();
            inner.find(bucket, key).and_then(|idx| {
                let node = inner.node(idx)?;
                if now >= node.expires_at {
                    Some((idx, None))
                } else {
                    Some((idx, Some(node.value.clone())))
                }
            })
        };

        match probe {
            Some((idx, Some(value))) => {
                let mut inner = self.inner.write();
                // The slot may have been recycled between the two locks
                if inner.node(idx).is_some_and(|n| n.key == key) {
                    inner.touch(idx);
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some((_, None)) => {
                let mut inner = self.inner.write();
                if let Some(idx) = inner.find(bucket, key) {
                    if inner.node(idx).is_some_and(|n| now >= n.expires_at) {
                        inner.take(idx);
                    }
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace, refreshing the TTL; evicts the LRU tail when full
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let bucket = self.bucket_of(&key);
        let expires_at = Instant::now() + self.ttl;
        let mut inner = self.inner.write();

        if let Some(idx) = inner.find(bucket, &key) {
            if let Some(node) = inner.node_mut(idx) {
                node.value = value;
                node.expires_at = expires_at;
            }
            inner.touch(idx);
            return;
        }

        if inner.len >= self.capacity {
            if let Some(victim) = inner.tail {
                inner.take(victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        inner.push(Node {
            key,
            value,
            expires_at,
            bucket,
            chain_next: None,
            prev: None,
            next: None,
        });
    }

    /// Drop an entry, returning its value if it was present
    pub fn remove(&self, key: &str) -> Option<V> {
        let bucket = self.bucket_of(key);
        let mut inner = self.inner.write();
        let idx = inner.find(bucket, key)?;
        inner.take(idx).map(|n| n.value)
    }

    /// Whether a live entry exists, without touching LRU order or counters
    pub fn contains(&self, key: &str) -> bool {
        let bucket = self.bucket_of(key);
        let inner = self.inner.read();
        inner
            .find(bucket, key)
            .and_then(|idx| inner.node(idx))
            .is_some_and(|n| Instant::now() < n.expires_at)
    }

    /// Reap every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let expired: Vec<usize> = inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().filter(|n| now >= n.expires_at).map(|_| i))
            .collect();
        for idx in &expired {
            inner.take(*idx);
        }
        expired.len()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity,
        }
    }

    /// Keys from most to least recently used
    #[cfg(test)]
    fn lru_order(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut keys = Vec::new();
        let mut cur = inner.head;
        while let Some(idx) = cur {
            let node = inner.node(idx).unwrap();
            keys.push(node.key.clone());
            cur = node.next;
        }
        keys
    }
}

// =============================================================================
// Tests
// =============================================================================
