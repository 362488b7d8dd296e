//! Prometheus metrics
//!
//! Each engine owns its own `prometheus::Registry`, so several engines in one
//! process (multi-node simulation) never collide on metric names.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::cache::CacheStats;
use crate::error::{Error, Result};

/// Outcome label of a successful operation
pub const OUTCOME_OK: &str = "ok";

/// Data plane metrics for one engine
pub struct EngineMetrics {
    registry: Registry,
    /// Object operations by `op` and `outcome`
    ops: IntCounterVec,
    /// Object operation latency by `op`
    op_duration: HistogramVec,
    /// Puts that fell back to a single disk
    degraded_writes: IntCounter,
    /// Cache counters by `cache` and `stat`
    cache: IntGaugeVec,
}

fn register_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metric registration failed: {}", e))
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let ops = IntCounterVec::new(
            Opts::new("shardvault_object_ops_total", "Object operations by outcome"),
            &["op", "outcome"],
        )
        .map_err(register_err)?;
        let op_duration = HistogramVec::new(
            HistogramOpts::new(
                "shardvault_object_op_duration_seconds",
                "Object operation latency",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["op"],
        )
        .map_err(register_err)?;
        let degraded_writes = IntCounter::new(
            "shardvault_degraded_writes_total",
            "Puts stored on a single disk because the set was too small",
        )
        .map_err(register_err)?;
        let cache = IntGaugeVec::new(
            Opts::new("shardvault_cache", "Cache counters"),
            &["cache", "stat"],
        )
        .map_err(register_err)?;

        registry.register(Box::new(ops.clone())).map_err(register_err)?;
        registry
            .register(Box::new(op_duration.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(degraded_writes.clone()))
            .map_err(register_err)?;
        registry.register(Box::new(cache.clone())).map_err(register_err)?;

        Ok(Self {
            registry,
            ops,
            op_duration,
            degraded_writes,
            cache,
        })
    }

    /// Count one operation; errors are labelled by kind
    pub fn observe<T>(&self, op: &str, result: &Result<T>, elapsed: Duration) {
        let outcome = match result {
            Ok(_) => OUTCOME_OK,
            Err(e) => e.kind(),
        };
        self.ops.with_label_values(&[op, outcome]).inc();
        self.op_duration
            .with_label_values(&[op])
            .observe(elapsed.as_secs_f64());
    }

    pub fn op_count(&self, op: &str, outcome: &str) -> u64 {
        self.ops.with_label_values(&[op, outcome]).get()
    }

    pub fn record_degraded_write(&self) {
        self.degraded_writes.inc();
    }

    pub fn degraded_writes(&self) -> u64 {
        self.degraded_writes.get()
    }

    /// Publish a cache snapshot under `name`
    pub fn update_cache(&self, name: &str, stats: &CacheStats) {
        let set = |stat: &str, value: u64| {
            self.cache
                .with_label_values(&[name, stat])
                .set(value.min(i64::MAX as u64) as i64);
        };
        set("hits", stats.hits);
        set("misses", stats.misses);
        set("evictions", stats.evictions);
        set("entries", stats.entries as u64);
        set("capacity", stats.capacity as u64);
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metric encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metric encoding: {}", e)))
    }
}
