//! Orderline Demo - Main Entry Point
//!
//! Runs a simulated-latency workload through the ordered inference pipeline,
//! checks that results come back in submission order and reports throughput.

use anyhow::Context;
use orderline_common::config::OrderlineConfig;
use orderline_pipeline::simulate::{self, Detection, Job, SimulatedInfer};
use orderline_pipeline::AsyncPipeline;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Outcome of one demo run
#[derive(Debug, Default)]
struct Summary {
    delivered: u64,
    failed: u64,
    out_of_order: u64,
    elapsed: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match std::env::var("ORDERLINE_CONFIG") {
        Ok(path) => OrderlineConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        Err(_) => OrderlineConfig::from_env().context("loading configuration from environment")?,
    };
    let observability = config.observability();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "orderline_demo={0},orderline_pipeline={0}",
                    observability.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Orderline demo");

    let workload_config = config.workload.clone().unwrap_or_default();
    let jobs = simulate::workload(&workload_config);

    let pipeline: Arc<AsyncPipeline<Job, Detection>> = Arc::new(AsyncPipeline::new(
        config.pipeline.clone(),
        SimulatedInfer::factory,
    )?);

    info!(
        "Pipeline {} started: workers={}, depth={}, items={}, latency={}-{}ms",
        pipeline.id(),
        pipeline.worker_count(),
        pipeline.suggested_depth(),
        jobs.len(),
        workload_config.min_latency_ms,
        workload_config.max_latency_ms
    );

    let mut runner = tokio::task::spawn_blocking({
        let pipeline = pipeline.clone();
        move || run_workload(&pipeline, jobs)
    });

    // Wait for completion or a shutdown signal
    let summary = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, draining in-flight items");
            let stopping = pipeline.clone();
            tokio::task::spawn_blocking(move || stopping.shutdown()).await??;
            runner.await?
        }
        result = &mut runner => result?,
    };

    let pipeline_ref = pipeline.clone();
    tokio::task::spawn_blocking(move || pipeline_ref.shutdown()).await??;

    info!(
        "Delivered {} results ({} failed) in {:?}: {:.1} items/s",
        summary.delivered + summary.failed,
        summary.failed,
        summary.elapsed,
        (summary.delivered + summary.failed) as f64 / summary.elapsed.as_secs_f64().max(f64::EPSILON)
    );

    if observability.enable_metrics {
        info!("Pipeline metrics:\n{}", pipeline.metrics().gather());
    }

    anyhow::ensure!(
        summary.out_of_order == 0,
        "{} results were delivered out of order",
        summary.out_of_order
    );

    info!("Orderline demo complete");
    Ok(())
}

/// Push every job through the pipeline and verify delivery order
fn run_workload(pipeline: &AsyncPipeline<Job, Detection>, jobs: Vec<Job>) -> Summary {
    let start = Instant::now();
    let mut summary = Summary::default();
    let mut expected = 1u64;

    for result in pipeline.map_ordered(jobs) {
        match result {
            Ok(detection) => {
                if detection.job_id != expected {
                    warn!("Expected job {}, got job {}", expected, detection.job_id);
                    summary.out_of_order += 1;
                }
                trace!(
                    "Job {} done on worker {} ({}), score {:.3}",
                    detection.job_id,
                    detection.worker,
                    detection.device,
                    detection.score
                );
                summary.delivered += 1;
            }
            Err(e) if e.is_item_failure() => {
                if e.sequence() != Some(expected) {
                    warn!("Expected job {}, got failure {}", expected, e);
                    summary.out_of_order += 1;
                }
                summary.failed += 1;
            }
            Err(e) => {
                warn!("Pipeline stopped: {}", e);
                break;
            }
        }
        expected += 1;
    }

    summary.elapsed = start.elapsed();
    summary
}
