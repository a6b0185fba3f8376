//! Inference collaborator seam
//!
//! The pipeline never looks inside an inference call. It only needs something
//! that turns one input into one output, built once per worker by a factory
//! that knows which device the worker is bound to.

use orderline_common::error::{OrderlineError, Result};
use std::fmt;
use tracing::{debug, warn};

/// A single-item inference collaborator.
///
/// Each worker owns one instance, so implementations may hold mutable,
/// device-affine state and need not be `Send`.
pub trait Infer<P> {
    type Output;

    /// Run inference on one input
    fn infer(&mut self, input: P) -> anyhow::Result<Self::Output>;
}

impl<P, O, F> Infer<P> for F
where
    F: FnMut(P) -> anyhow::Result<O>,
{
    type Output = O;

    fn infer(&mut self, input: P) -> anyhow::Result<O> {
        self(input)
    }
}

/// Device a worker's collaborator should be placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Host CPU
    Cpu,

    /// Accelerator with the given ordinal
    Gpu(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(ordinal) => write!(f, "cuda:{}", ordinal),
        }
    }
}

impl Device {
    /// Device for worker `index` in a pool spread over `num_devices` devices.
    ///
    /// Workers wrap around when there are more workers than devices.
    pub fn for_worker(index: usize, num_devices: usize) -> Self {
        if num_devices == 0 {
            Device::Cpu
        } else {
            Device::Gpu((index % num_devices) as u32)
        }
    }
}

/// What a collaborator factory learns about the worker it is building for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    /// Zero-based worker index
    pub index: usize,

    /// Device assigned to this worker
    pub device: Device,
}

/// Anything that maps an input to a prediction.
///
/// Implemented by the threaded [`AsyncPipeline`](crate::AsyncPipeline) and by
/// [`InlinePredictor`], so callers can switch between parallel and sequential
/// execution without changing their driving loop.
pub trait Predictor<P> {
    type Output;

    /// Predict the output for one input
    fn predict(&mut self, input: P) -> Result<Self::Output>;
}

/// Runs a collaborator on the calling thread.
///
/// Failures are reported with the same item-level errors the pipeline uses,
/// numbered from 1 in call order.
pub struct InlinePredictor<I> {
    inner: I,
    calls: u64,
}

impl<I> InlinePredictor<I> {
    /// Wrap an already constructed collaborator
    pub fn new(inner: I) -> Self {
        Self { inner, calls: 0 }
    }

    /// Build the collaborator through the same factory a pipeline would use
    pub fn from_factory<F>(factory: F) -> Result<Self>
    where
        F: FnOnce(&WorkerContext) -> anyhow::Result<I>,
    {
        let context = WorkerContext {
            index: 0,
            device: Device::Cpu,
        };
        let inner = factory(&context)
            .map_err(|e| OrderlineError::worker_startup(0, format!("{:#}", e)))?;

        debug!("Inline predictor ready on {}", context.device);
        Ok(Self::new(inner))
    }

    /// Number of predictions made so far
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl<P, I> Predictor<P> for InlinePredictor<I>
where
    I: Infer<P>,
{
    type Output = I::Output;

    fn predict(&mut self, input: P) -> Result<I::Output> {
        self.calls += 1;
        self.inner.infer(input).map_err(|e| {
            warn!(sequence = self.calls, "Inline inference failed: {:#}", e);
            OrderlineError::inference(self.calls, format!("{:#}", e))
        })
    }
}
