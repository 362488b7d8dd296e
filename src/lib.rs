//! ShardVault - Erasure-Coded Object Data Plane
//!
//! The storage core of a distributed, S3-compatible object store. Objects
//! are placed on erasure sets by a consistent-hash ring, split into K data
//! and M parity chunks, written to the disks of the set (locally or over
//! RPC), and tracked in a cached location registry.
//!
//! # Architecture
//!
//! ```text
//!                        ┌──────────────────────┐
//!   put/get/delete ────▶ │     ObjectEngine     │ ◀──── EngineStatus / metrics
//!                        └──────────┬───────────┘
//!          ┌───────────────┬────────┴───────┬──────────────────┐
//!          ▼               ▼                ▼                  ▼
//!   PlacementEngine    DataPath      LocationRegistry    MetadataCache
//!   (hash ring)      (RS codec +      (LRU + backend)     (LRU of xl.meta)
//!                     ParallelIo)
//!                          │
//!                          ▼
//!                    ChunkTransport ──▶ LocalDiskStore | RpcClient
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Slab-backed LRU cache with per-entry TTL
//! - [`config`] - Engine configuration
//! - [`ec`] - Reed-Solomon codec
//! - [`engine`] - Object put/get/delete orchestration and status
//! - [`error`] - Error types
//! - [`hash`] - SipHash and xxHash primitives, on-disk naming
//! - [`io`] - Bounded parallel fan-out of per-disk operations
//! - [`meta`] - `xl.meta` documents and their cache
//! - [`metrics`] - Prometheus metrics
//! - [`placement`] - Consistent-hash ring and placement engine
//! - [`registry`] - Object location registry
//! - [`topology`] - Cluster topology model and providers
//! - [`transport`] - Local and remote chunk I/O

pub mod cache;
pub mod config;
pub mod ec;
pub mod engine;
pub mod error;
pub mod hash;
pub mod io;
pub mod meta;
pub mod metrics;
pub mod placement;
pub mod registry;
pub mod topology;
pub mod transport;

// Re-export commonly used types
pub use config::EngineConfig;
pub use ec::ReedSolomonCodec;
pub use engine::{EngineContext, EngineStatus, ObjectEngine, ObjectInfo, PutOptions};
pub use error::{Error, Result};
pub use placement::{PlacementEngine, PlacementResult};
pub use registry::{LocationRegistry, ObjectLocation, VersionSelector};
pub use topology::{StaticTopology, Topology, TopologyProvider};
