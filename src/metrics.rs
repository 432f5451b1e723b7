//! Prometheus metrics for allocator activity
//!
//! The allocator itself records nothing; owners of an allocator report outcomes
//! through [`AllocatorMetrics`], labeled by the allocator's label.
//!
//! Metrics:
//! - `fiballoc_allocations_total{allocator, status}` (success / exhausted)
//! - `fiballoc_frees_total{allocator}`
//! - `fiballoc_allocated_units{allocator}`
//! - `fiballoc_live_nodes{allocator}`
//! - `fiballoc_fragmentation_ratio{allocator}`

use crate::alloc::{Allocation, AllocatorStats};
use crate::error::{Error, Result};
use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Once;
use tracing::info;

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref ALLOCATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fiballoc_allocations_total", "Allocation requests by outcome"),
        &["allocator", "status"]
    ).unwrap();

    pub static ref FREES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fiballoc_frees_total", "Freed blocks"),
        &["allocator"]
    ).unwrap();

    pub static ref ALLOCATED_UNITS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("fiballoc_allocated_units", "Units covered by outstanding allocations"),
        &["allocator"]
    ).unwrap();

    pub static ref LIVE_NODES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("fiballoc_live_nodes", "Split nodes currently in the tree"),
        &["allocator"]
    ).unwrap();

    pub static ref FRAGMENTATION: GaugeVec = GaugeVec::new(
        Opts::new(
            "fiballoc_fragmentation_ratio",
            "Share of free space outside the largest free block"
        ),
        &["allocator"]
    ).unwrap();
}

static INIT: Once = Once::new();

/// Register all metrics with [`METRICS_REGISTRY`]; later calls do nothing
pub fn init_metrics() {
    INIT.call_once(|| {
        info!("Initializing Prometheus metrics");
        METRICS_REGISTRY.register(Box::new(ALLOCATIONS_TOTAL.clone())).ok();
        METRICS_REGISTRY.register(Box::new(FREES_TOTAL.clone())).ok();
        METRICS_REGISTRY.register(Box::new(ALLOCATED_UNITS.clone())).ok();
        METRICS_REGISTRY.register(Box::new(LIVE_NODES.clone())).ok();
        METRICS_REGISTRY.register(Box::new(FRAGMENTATION.clone())).ok();
    });
}

/// Records the activity of one allocator
#[derive(Debug, Clone)]
pub struct AllocatorMetrics {
    label: String,
}

impl AllocatorMetrics {
    pub fn new(label: impl Into<String>) -> Self {
        init_metrics();
        Self {
            label: label.into(),
        }
    }

    /// Record the outcome of an allocation request
    pub fn record_allocation(&self, outcome: &Result<Allocation>) {
        let status = match outcome {
            Ok(_) => "success",
            Err(e) if e.is_exhausted() => "exhausted",
            Err(_) => "error",
        };
        ALLOCATIONS_TOTAL
            .with_label_values(&[self.label.as_str(), status])
            .inc();
    }

    /// Record a freed block
    pub fn record_free(&self) {
        FREES_TOTAL.with_label_values(&[self.label.as_str()]).inc();
    }

    /// Update gauges from a statistics snapshot
    pub fn observe(&self, stats: &AllocatorStats) {
        let label = [self.label.as_str()];
        ALLOCATED_UNITS
            .with_label_values(&label)
            .set(stats.allocated_units as i64);
        LIVE_NODES
            .with_label_values(&label)
            .set(stats.live_nodes as i64);
        FRAGMENTATION
            .with_label_values(&label)
            .set(stats.fragmentation());
    }
}

/// Render every registered metric in the Prometheus text format
pub fn export_metrics() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&METRICS_REGISTRY.gather(), &mut buffer)
        .map_err(|e| Error::Metrics(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| Error::Metrics(format!("Metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::FibAlloc;

    #[test]
    fn test_metrics_export() {
        let mut fib = FibAlloc::with_label("metrics_test", 8).unwrap();
        let metrics = AllocatorMetrics::new(fib.label());

        let outcome = fib.allocate_exact(5);
        metrics.record_allocation(&outcome);
        metrics.record_allocation(&fib.allocate_exact(100));
        fib.free(outcome.unwrap().offset);
        metrics.record_free();
        metrics.observe(&fib.stats());

        let text = export_metrics().unwrap();
        assert!(text.contains("fiballoc_allocations_total"));
        assert!(text.contains("allocator=\"metrics_test\""));
        assert!(text.contains("status=\"exhausted\""));
        assert!(text.contains("fiballoc_live_nodes"));
    }
}
