//! Engine configuration
//!
//! Every field has a default, so an empty YAML document is a valid config.
//!
//! ```yaml
//! erasure:
//!   data_shards: 4
//!   parity_shards: 2
//! inline_threshold: 131072
//! ring:
//!   vnodes_per_set: 150
//! registry_cache:
//!   capacity: 10000
//!   ttl_secs: 300
//! rpc:
//!   read_timeout_ms: 5000
//!   write_timeout_ms: 60000
//! local_endpoint: "http://node1:9000"
//! local_disks:
//!   - uuid: disk-0
//!     path: /mnt/disk0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::io::MAX_FANOUT;
use crate::registry::MAX_DISK_IDXS;
use crate::topology::{LocalDisk, LocalDiskTable};
use crate::transport::RpcTimeouts;

/// Default inline threshold (128 KiB)
pub const DEFAULT_INLINE_THRESHOLD: usize = 128 * 1024;

/// K+M layout for newly written objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErasureConfig {
    /// Number of data shards (K)
    pub data_shards: usize,
    /// Number of parity shards (M)
    pub parity_shards: usize,
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            data_shards: 4,
            parity_shards: 2,
        }
    }
}

impl ErasureConfig {
    pub fn total(&self) -> usize {
        self.data_shards + self.parity_shards
    }
}

/// Placement ring settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Virtual nodes contributed by each active set
    pub vnodes_per_set: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            vnodes_per_set: crate::placement::DEFAULT_VNODES_PER_SET,
        }
    }
}

/// Size and lifetime of an LRU cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries
    pub capacity: usize,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    fn registry_default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 300,
        }
    }

    fn metadata_default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 60,
        }
    }
}

/// Cache section as written; absent keys keep the cache's own default
#[derive(Deserialize)]
struct PartialCacheConfig {
    capacity: Option<usize>,
    ttl_secs: Option<u64>,
}

impl PartialCacheConfig {
    fn or(self, defaults: CacheConfig) -> CacheConfig {
        CacheConfig {
            capacity: self.capacity.unwrap_or(defaults.capacity),
            ttl_secs: self.ttl_secs.unwrap_or(defaults.ttl_secs),
        }
    }
}

fn registry_cache<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<CacheConfig, D::Error> {
    PartialCacheConfig::deserialize(d).map(|p| p.or(CacheConfig::registry_default()))
}

fn metadata_cache<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<CacheConfig, D::Error> {
    PartialCacheConfig::deserialize(d).map(|p| p.or(CacheConfig::metadata_default()))
}

/// Remote call settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Deadline for reads in milliseconds
    pub read_timeout_ms: u64,
    /// Deadline for writes in milliseconds
    pub write_timeout_ms: u64,
    /// Use the binary chunk path when the client supports it
    pub binary_transport: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 5_000,
            write_timeout_ms: 60_000,
            binary_transport: true,
        }
    }
}

impl RpcConfig {
    pub fn timeouts(&self) -> RpcTimeouts {
        RpcTimeouts {
            read: Duration::from_millis(self.read_timeout_ms),
            write: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub erasure: ErasureConfig,
    /// Objects smaller than this are embedded in their metadata
    pub inline_threshold: usize,
    pub ring: RingConfig,
    #[serde(deserialize_with = "registry_cache")]
    pub registry_cache: CacheConfig,
    #[serde(deserialize_with = "metadata_cache")]
    pub metadata_cache: CacheConfig,
    pub rpc: RpcConfig,
    /// `scheme://host:port` of this node; unset means single-node
    pub local_endpoint: Option<String>,
    /// Disks this process can reach directly
    pub local_disks: Vec<LocalDisk>,
    /// Worker ceiling per parallel I/O call
    pub max_fanout: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            erasure: ErasureConfig::default(),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            ring: RingConfig::default(),
            registry_cache: CacheConfig::registry_default(),
            metadata_cache: CacheConfig::metadata_default(),
            rpc: RpcConfig::default(),
            local_endpoint: None,
            local_disks: Vec::new(),
            max_fanout: MAX_FANOUT,
        }
    }
}

impl EngineConfig {
    /// Parse YAML and validate
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    /// Reject layouts the engine cannot run
    pub fn validate(&self) -> Result<()> {
        let ec = &self.erasure;
        if ec.data_shards == 0 || ec.parity_shards == 0 {
            return Err(Error::Config(format!(
                "erasure layout {}+{} needs at least one data and one parity shard",
                ec.data_shards, ec.parity_shards
            )));
        }
        if ec.total() > MAX_DISK_IDXS {
            return Err(Error::Config(format!(
                "erasure layout {}+{} exceeds {} disks",
                ec.data_shards, ec.parity_shards, MAX_DISK_IDXS
            )));
        }
        if self.max_fanout == 0 || self.max_fanout > MAX_FANOUT {
            return Err(Error::Config(format!(
                "max_fanout must be within 1..={}",
                MAX_FANOUT
            )));
        }
        if self.max_fanout < ec.total() {
            return Err(Error::Config(format!(
                "max_fanout {} is below the {} chunks of one object",
                self.max_fanout,
                ec.total()
            )));
        }
        if self.ring.vnodes_per_set == 0 {
            return Err(Error::Config("vnodes_per_set must be positive".to_string()));
        }
        if self.registry_cache.capacity == 0 || self.metadata_cache.capacity == 0 {
            return Err(Error::Config("cache capacities must be positive".to_string()));
        }
        Ok(())
    }

    pub fn local_disk_table(&self) -> LocalDiskTable {
        LocalDiskTable::new(self.local_disks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.erasure.data_shards, 4);
        assert_eq!(config.erasure.parity_shards, 2);
        assert_eq!(config.inline_threshold, 131_072);
        assert_eq!(config.ring.vnodes_per_set, 150);
        assert_eq!(config.registry_cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.metadata_cache.ttl(), Duration::from_secs(60));
        assert_eq!(config.rpc.timeouts(), RpcTimeouts::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(EngineConfig::from_yaml("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
erasure:
  data_shards: 8
  parity_shards: 4
local_endpoint: "http://node1:9000"
local_disks:
  - uuid: d0
    path: /mnt/d0
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.erasure.total(), 12);
        assert_eq!(config.local_endpoint.as_deref(), Some("http://node1:9000"));
        assert_eq!(config.local_disk_table().len(), 1);
        assert_eq!(config.ring.vnodes_per_set, 150);
    }

    #[test]
    fn test_partial_cache_sections_keep_their_defaults() {
        let yaml = r#"
registry_cache:
  capacity: 500
metadata_cache:
  ttl_secs: 5
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.registry_cache.capacity, 500);
        assert_eq!(config.registry_cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.metadata_cache.capacity, 10_000);
        assert_eq!(config.metadata_cache.ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_layouts() {
        let mut config = EngineConfig::default();
        config.erasure.parity_shards = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = EngineConfig::default();
        config.erasure = ErasureConfig {
            data_shards: 12,
            parity_shards: 6,
        };
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.max_fanout = 64;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.registry_cache.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_yaml_is_config_error() {
        assert!(matches!(
            EngineConfig::from_yaml("erasure: [1, 2"),
            Err(Error::Config(_))
        ));
    }
}
