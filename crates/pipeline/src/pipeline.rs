//! Ordered asynchronous inference pipeline
//!
//! Callers submit inputs and retrieve outputs; a pool of worker threads runs
//! inference in between. Workers finish in any order, but `retrieve` always
//! returns results in submission order.
//!
//! The pipeline applies no backpressure unless `max_pending` is configured:
//! [`pending_count`](AsyncPipeline::pending_count) and
//! [`suggested_depth`](AsyncPipeline::suggested_depth) let the caller do its
//! own flow control.

use crate::inbox::{Sequence, SequencedInbox};
use crate::ordered::OrderedMap;
use crate::outbox::{self, ResultItem, UnorderedOutbox};
use crate::predictor::{Device, Infer, Predictor, WorkerContext};
use crate::reorder::ReorderBuffer;
use crate::worker::{self, WorkerHandle, WorkerShared};
use crossbeam::channel;
use orderline_common::config::PipelineConfig;
use orderline_common::error::{OrderlineError, Result};
use orderline_common::metrics::PipelineMetrics;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Multi-worker inference pipeline with in-order delivery
pub struct AsyncPipeline<P, O> {
    /// Instance id, attached to every log line
    id: Uuid,

    config: PipelineConfig,

    /// Pending work, shared with the workers
    inbox: Arc<SequencedInbox<P>>,

    /// Finished work in completion order
    outbox: UnorderedOutbox<O>,

    /// Held-back results; locked for the whole of a retrieve
    reorder: Mutex<ReorderBuffer<O>>,

    /// Number of results handed to callers
    retrieved: AtomicU64,

    workers: Mutex<Vec<WorkerHandle>>,

    metrics: PipelineMetrics,
}

impl<P, O> AsyncPipeline<P, O>
where
    P: Send + 'static,
    O: Send + 'static,
{
    /// Start a pipeline and its workers.
    ///
    /// `factory` is called once per worker, on that worker's thread, with the
    /// worker's index and device. Returns once every worker has built its
    /// collaborator; if any factory call fails, the workers that did start
    /// are stopped and joined and the first failure is returned.
    pub fn new<I, F>(config: PipelineConfig, factory: F) -> Result<Self>
    where
        I: Infer<P, Output = O>,
        F: Fn(&WorkerContext) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        config.validate()?;

        let id = Uuid::new_v4();
        let worker_count = config.worker_count();
        let metrics = PipelineMetrics::new();
        let inbox = Arc::new(SequencedInbox::new());
        let (sender, outbox) = outbox::channel();

        let shared = WorkerShared {
            pipeline: id,
            inbox: inbox.clone(),
            outbox: sender,
            metrics: metrics.clone(),
        };

        info!(
            pipeline = %id,
            workers = worker_count,
            devices = config.num_devices,
            "Starting inference pipeline"
        );

        let factory = Arc::new(factory);
        let (ready_tx, ready_rx) = channel::bounded(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        let mut startup_error = None;

        for index in 0..worker_count {
            let context = WorkerContext {
                index,
                device: Device::for_worker(index, config.num_devices),
            };
            match worker::spawn(
                context,
                shared.clone(),
                factory.clone(),
                ready_tx.clone(),
                config.thread_stack_kb,
            ) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    startup_error = Some(e);
                    break;
                }
            }
        }

        // Only the workers may keep the outbox open.
        drop(shared);
        drop(ready_tx);

        for _ in 0..handles.len() {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    startup_error.get_or_insert(e);
                }
                Err(_) => {
                    startup_error
                        .get_or_insert(OrderlineError::internal("worker exited before reporting startup"));
                    break;
                }
            }
        }

        let pipeline = Self {
            id,
            config,
            inbox,
            outbox,
            reorder: Mutex::new(ReorderBuffer::new()),
            retrieved: AtomicU64::new(0),
            workers: Mutex::new(handles),
            metrics,
        };

        if let Some(err) = startup_error {
            error!(pipeline = %id, "Pipeline startup failed: {}", err);
            if let Err(join_err) = pipeline.shutdown() {
                error!(pipeline = %id, "Cleanup after failed startup: {}", join_err);
            }
            return Err(err);
        }

        info!(pipeline = %id, "Inference pipeline ready");
        Ok(pipeline)
    }

    /// Start a pipeline with `num_workers` CPU workers and default settings
    pub fn with_workers<I, F>(num_workers: usize, factory: F) -> Result<Self>
    where
        I: Infer<P, Output = O>,
        F: Fn(&WorkerContext) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        Self::new(PipelineConfig::with_workers(num_workers), factory)
    }
}

impl<P, O> AsyncPipeline<P, O> {
    /// Queue an input and return its sequence number.
    ///
    /// Never blocks. Fails with `Closed` after [`shutdown`](Self::shutdown)
    /// and with `QueueFull` when `max_pending` is configured and reached.
    pub fn submit(&self, payload: P) -> Result<Sequence> {
        let limit = self.config.max_pending;
        let admit = |accepted: u64| match limit {
            Some(limit) => {
                // `retrieved` only grows, so a stale read can only reject early.
                let pending = accepted.saturating_sub(self.retrieved.load(Ordering::Acquire));
                if pending >= limit as u64 {
                    Err(OrderlineError::queue_full(format!(
                        "{} items pending, limit is {}",
                        pending, limit
                    )))
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        };

        self.metrics.inbox_depth.inc();
        let sequence = match self.inbox.submit_with(payload, admit) {
            Ok(sequence) => sequence,
            Err(e) => {
                self.metrics.inbox_depth.dec();
                return Err(e);
            }
        };

        self.metrics.submitted.inc();
        self.metrics.pending.inc();
        debug!(pipeline = %self.id, sequence, "Item submitted");
        Ok(sequence)
    }

    /// Return the next result in submission order, blocking until it exists.
    ///
    /// A failed item is returned as its item-level error and still uses up
    /// its turn. With nothing outstanding this blocks until more work is
    /// submitted and finished; after shutdown it returns `Closed` once every
    /// remaining result has been delivered.
    pub fn retrieve(&self) -> Result<O> {
        let reorder = self.reorder.lock();
        self.deliver(reorder, || self.outbox.pop())
    }

    /// Like [`retrieve`](Self::retrieve), but gives up after `timeout`.
    ///
    /// A timeout loses nothing: results pulled in the meantime stay held for
    /// later calls.
    pub fn retrieve_timeout(&self, timeout: Duration) -> Result<O> {
        let deadline = Instant::now() + timeout;
        let reorder = self
            .reorder
            .try_lock_until(deadline)
            .ok_or_else(|| OrderlineError::timeout("another retrieve is in progress"))?;
        self.deliver(reorder, || self.outbox.pop_until(deadline))
    }

    fn deliver<F>(&self, mut reorder: MutexGuard<'_, ReorderBuffer<O>>, source: F) -> Result<O>
    where
        F: FnMut() -> Result<ResultItem<O>>,
    {
        let resolved = reorder.resolve(source);
        self.metrics.reorder_depth.set(reorder.len() as i64);
        let item = resolved?;

        self.retrieved.store(reorder.delivered(), Ordering::Release);
        drop(reorder);

        self.metrics.delivered.inc();
        self.metrics.pending.dec();
        debug!(pipeline = %self.id, sequence = item.sequence, "Result delivered");
        item.outcome
    }

    /// Submit then retrieve.
    ///
    /// With nothing else outstanding this is a synchronous prediction for
    /// `payload`; with a backlog it returns the oldest outstanding result.
    pub fn predict(&self, payload: P) -> Result<O> {
        self.submit(payload)?;
        self.retrieve()
    }

    /// Stream `inputs` through the pipeline, yielding outputs in input order
    /// and keeping [`suggested_depth`](Self::suggested_depth) items in flight.
    pub fn map_ordered<It>(&self, inputs: It) -> OrderedMap<'_, P, O, It::IntoIter>
    where
        It: IntoIterator<Item = P>,
    {
        OrderedMap::new(self, inputs.into_iter(), self.suggested_depth())
    }

    /// Submitted minus retrieved
    pub fn pending_count(&self) -> u64 {
        let retrieved = self.retrieved.load(Ordering::Acquire);
        self.inbox.submitted().saturating_sub(retrieved)
    }

    /// Advisory number of items to keep in flight to saturate the workers
    pub fn suggested_depth(&self) -> usize {
        let depth = self.config.suggested_depth();
        match self.config.max_pending {
            Some(limit) => depth.min(limit),
            None => depth,
        }
    }

    /// Number of workers the pipeline was started with
    pub fn worker_count(&self) -> usize {
        self.config.worker_count()
    }

    /// Instance id used in log fields
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Pipeline metrics
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Whether shutdown has started
    pub fn is_shut_down(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Stop accepting work and wait for every worker to exit.
    ///
    /// Items already submitted are still processed and stay retrievable.
    /// Calling this again, or concurrently, is safe: later callers wait for
    /// the first one to finish joining and then return `Ok`.
    pub fn shutdown(&self) -> Result<()> {
        self.inbox.close();

        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return Ok(());
        }

        info!(pipeline = %self.id, workers = workers.len(), "Shutting down inference pipeline");

        let mut first_error = None;
        for handle in workers.drain(..) {
            let index = handle.context.index;
            if let Err(e) = handle.join() {
                error!(pipeline = %self.id, worker = index, "Worker join failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        info!(
            pipeline = %self.id,
            undelivered = self.pending_count(),
            "Inference pipeline shutdown complete"
        );
        first_error.map_or(Ok(()), Err)
    }
}

impl<P, O> Predictor<P> for AsyncPipeline<P, O> {
    type Output = O;

    fn predict(&mut self, input: P) -> Result<O> {
        AsyncPipeline::predict(self, input)
    }
}

impl<P, O> Drop for AsyncPipeline<P, O> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(pipeline = %self.id, "Shutdown on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn echo_factory(_: &WorkerContext) -> anyhow::Result<impl FnMut(u64) -> anyhow::Result<u64>> {
        Ok(|x: u64| -> anyhow::Result<u64> { Ok(x) })
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = AsyncPipeline::<u64, u64>::with_workers(0, echo_factory);
        assert!(matches!(result, Err(OrderlineError::Config(_))));
    }

    #[test]
    fn test_submit_assigns_sequences() {
        let pipeline = AsyncPipeline::with_workers(2, echo_factory).unwrap();

        assert_eq!(pipeline.submit(10).unwrap(), 1);
        assert_eq!(pipeline.submit(20).unwrap(), 2);
        assert_eq!(pipeline.retrieve().unwrap(), 10);
        assert_eq!(pipeline.retrieve().unwrap(), 20);
        assert_eq!(pipeline.metrics().delivered.get(), 2);
    }

    #[test]
    fn test_suggested_depth() {
        let pipeline = AsyncPipeline::with_workers(3, echo_factory).unwrap();
        assert_eq!(pipeline.worker_count(), 3);
        assert_eq!(pipeline.suggested_depth(), 15);

        let config = PipelineConfig {
            max_pending: Some(4),
            ..PipelineConfig::with_workers(3)
        };
        let bounded = AsyncPipeline::new(config, echo_factory).unwrap();
        assert_eq!(bounded.suggested_depth(), 4);
    }

    #[test]
    fn test_devices_assigned_per_worker() {
        let config = PipelineConfig {
            num_devices: 3,
            ..PipelineConfig::default()
        };
        let pipeline = AsyncPipeline::new(config, |ctx: &WorkerContext| {
            let device = ctx.device;
            Ok(move |_: ()| -> anyhow::Result<Device> { Ok(device) })
        })
        .unwrap();
        assert_eq!(pipeline.worker_count(), 3);

        for _ in 0..30 {
            pipeline.submit(()).unwrap();
        }
        for _ in 0..30 {
            assert!(matches!(pipeline.retrieve().unwrap(), Device::Gpu(0..=2)));
        }
    }

    #[test]
    fn test_retrieve_timeout_keeps_ordering() {
        let pipeline = AsyncPipeline::with_workers(2, |_: &WorkerContext| {
            Ok(|ms: u64| -> anyhow::Result<u64> {
                thread::sleep(Duration::from_millis(ms));
                Ok(ms)
            })
        })
        .unwrap();

        pipeline.submit(150).unwrap();
        pipeline.submit(1).unwrap();

        let err = pipeline.retrieve_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, OrderlineError::Timeout(_)));
        assert_eq!(pipeline.pending_count(), 2);

        assert_eq!(pipeline.retrieve().unwrap(), 150);
        assert_eq!(pipeline.retrieve_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn test_predictor_trait() {
        fn run<T: Predictor<u64, Output = u64>>(predictor: &mut T) -> u64 {
            (1..=4).map(|x| predictor.predict(x).unwrap()).sum()
        }

        let mut pipeline = AsyncPipeline::with_workers(2, echo_factory).unwrap();
        assert_eq!(run(&mut pipeline), 10);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pipeline = AsyncPipeline::with_workers(2, echo_factory).unwrap();
        pipeline.shutdown().unwrap();
        pipeline.shutdown().unwrap();
        assert!(pipeline.is_shut_down());
        assert_eq!(pipeline.metrics().active_workers.get(), 0);
    }
}
