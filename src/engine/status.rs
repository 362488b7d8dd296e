//! Engine Status
//!
//! Operator-visible health of one engine: placement readiness, topology
//! reachability and whether any write had to fall back to a single disk.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::placement::RingStats;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Engine is healthy
    Healthy,
    /// Engine serves requests with reduced redundancy
    Degraded,
    /// Engine cannot serve requests
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if status is healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Result of one component check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Status
    pub status: HealthStatus,
    /// Message
    pub message: Option<String>,
}

impl ComponentCheck {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Snapshot returned by `ObjectEngine::status`
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Worst status across checks
    pub status: HealthStatus,
    pub checks: Vec<ComponentCheck>,
    pub ring: Option<RingStats>,
    pub topology_generation: Option<u64>,
    /// Puts stored on a single disk since start
    pub degraded_writes: u64,
    pub last_degraded_write: Option<DateTime<Utc>>,
    pub registry_cache: CacheStats,
    pub metadata_cache: CacheStats,
    pub uptime_seconds: u64,
}

impl EngineStatus {
    /// Worst status of `checks`
    pub fn overall(checks: &[ComponentCheck]) -> HealthStatus {
        checks
            .iter()
            .map(|c| c.status)
            .max_by_key(HealthStatus::severity)
            .unwrap_or(HealthStatus::Healthy)
    }
}

/// Running counters behind the status snapshot
pub struct StatusTracker {
    start_time: Instant,
    degraded_writes: AtomicU64,
    last_degraded_write: RwLock<Option<DateTime<Utc>>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            degraded_writes: AtomicU64::new(0),
            last_degraded_write: RwLock::new(None),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn note_degraded_write(&self) {
        self.degraded_writes.fetch_add(1, Ordering::Relaxed);
        *self.last_degraded_write.write() = Some(Utc::now());
    }

    pub fn degraded_writes(&self) -> u64 {
        self.degraded_writes.load(Ordering::Relaxed)
    }

    pub fn last_degraded_write(&self) -> Option<DateTime<Utc>> {
        *self.last_degraded_write.read()
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
