//! Latency-injecting stand-in for a model
//!
//! Used by the demo binary, the throughput benchmark and the ordering tests.
//! Each job says how long it should take and whether it should fail, so a
//! workload can be shaped to force any completion order.

use crate::predictor::{Device, Infer, WorkerContext};
use orderline_common::config::WorkloadConfig;
use std::thread;
use std::time::Duration;

/// One simulated inference request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: u64,
    pub latency: Duration,
    pub fail: bool,
}

impl Job {
    /// Job that succeeds after `latency_ms`
    pub fn new(id: u64, latency_ms: u64) -> Self {
        Self {
            id,
            latency: Duration::from_millis(latency_ms),
            fail: false,
        }
    }

    /// Job that fails after `latency_ms`
    pub fn failing(id: u64, latency_ms: u64) -> Self {
        Self {
            fail: true,
            ..Self::new(id, latency_ms)
        }
    }
}

/// Output of a simulated job
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Id of the job this came from
    pub job_id: u64,

    /// Worker that ran the job
    pub worker: usize,

    /// Device of that worker
    pub device: Device,

    /// Deterministic pseudo score derived from the job id
    pub score: f32,
}

/// Collaborator that sleeps for each job's latency
#[derive(Debug)]
pub struct SimulatedInfer {
    context: WorkerContext,
    calls: u64,
}

impl SimulatedInfer {
    /// Factory suitable for [`AsyncPipeline::new`](crate::AsyncPipeline::new)
    pub fn factory(context: &WorkerContext) -> anyhow::Result<Self> {
        Ok(Self {
            context: *context,
            calls: 0,
        })
    }

    /// Jobs run by this instance
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Infer<Job> for SimulatedInfer {
    type Output = Detection;

    fn infer(&mut self, job: Job) -> anyhow::Result<Detection> {
        self.calls += 1;
        thread::sleep(job.latency);

        if job.fail {
            anyhow::bail!("simulated failure on job {}", job.id);
        }

        Ok(Detection {
            job_id: job.id,
            worker: self.context.index,
            device: self.context.device,
            score: score_for(job.id),
        })
    }
}

fn score_for(id: u64) -> f32 {
    ((id.wrapping_mul(2_654_435_761) % 1000) as f32) / 1000.0
}

/// Build the jobs described by a workload configuration.
///
/// Latencies are spread deterministically over the configured range so runs
/// are reproducible; ids start at 1 to line up with sequence numbers.
pub fn workload(config: &WorkloadConfig) -> Vec<Job> {
    let span = config.max_latency_ms.saturating_sub(config.min_latency_ms) + 1;

    (1..=config.items)
        .map(|id| {
            let latency_ms = config.min_latency_ms + id.wrapping_mul(7_919) % span;
            let fail = config.failure_every > 0 && id % config.failure_every == 0;
            Job {
                id,
                latency: Duration::from_millis(latency_ms),
                fail,
            }
        })
        .collect()
}
