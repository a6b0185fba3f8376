//! Metrics collection for Orderline
//!
//! Each pipeline owns its own Prometheus registry so several pipelines can
//! live in one process (and in one test binary) without name collisions.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics for a single pipeline instance
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub registry: Arc<Registry>,

    /// Items accepted by submit
    pub submitted: IntCounter,

    /// Items whose inference finished (successfully or not)
    pub completed: IntCounter,

    /// Items whose inference failed or panicked
    pub failed: IntCounter,

    /// Items handed back to the caller in order
    pub delivered: IntCounter,

    /// Items waiting in the inbox
    pub inbox_depth: IntGauge,

    /// Submitted minus delivered
    pub pending: IntGauge,

    /// Results held back waiting for an earlier sequence
    pub reorder_depth: IntGauge,

    /// Workers currently running
    pub active_workers: IntGauge,

    /// Duration of a single inference call
    pub infer_duration: Histogram,
}

impl PipelineMetrics {
    /// Create a new metrics set on a fresh registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let submitted = IntCounter::new(
            "orderline_items_submitted_total",
            "Total number of items submitted to the pipeline",
        )
        .unwrap();

        let completed = IntCounter::new(
            "orderline_items_completed_total",
            "Total number of items whose inference finished",
        )
        .unwrap();

        let failed = IntCounter::new(
            "orderline_items_failed_total",
            "Total number of items whose inference failed",
        )
        .unwrap();

        let delivered = IntCounter::new(
            "orderline_items_delivered_total",
            "Total number of results delivered in submission order",
        )
        .unwrap();

        let inbox_depth = IntGauge::new(
            "orderline_inbox_depth",
            "Current number of items waiting for a worker",
        )
        .unwrap();

        let pending = IntGauge::new(
            "orderline_pending_items",
            "Submitted items not yet retrieved",
        )
        .unwrap();

        let reorder_depth = IntGauge::new(
            "orderline_reorder_depth",
            "Completed results held back for ordering",
        )
        .unwrap();

        let active_workers = IntGauge::new(
            "orderline_active_workers",
            "Current number of running workers",
        )
        .unwrap();

        let infer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "orderline_infer_duration_seconds",
                "Inference call duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )
        .unwrap();

        registry.register(Box::new(submitted.clone())).unwrap();
        registry.register(Box::new(completed.clone())).unwrap();
        registry.register(Box::new(failed.clone())).unwrap();
        registry.register(Box::new(delivered.clone())).unwrap();
        registry.register(Box::new(inbox_depth.clone())).unwrap();
        registry.register(Box::new(pending.clone())).unwrap();
        registry.register(Box::new(reorder_depth.clone())).unwrap();
        registry.register(Box::new(active_workers.clone())).unwrap();
        registry.register(Box::new(infer_duration.clone())).unwrap();

        PipelineMetrics {
            registry,
            submitted,
            completed,
            failed,
            delivered,
            inbox_depth,
            pending,
            reorder_depth,
            active_workers,
            infer_duration,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Observe the duration of a closure
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}
