//! Worker threads
//!
//! A worker builds its own inference collaborator on its own thread, reports
//! whether that worked, then loops: take one item from the inbox, run
//! inference, publish the outcome under the item's sequence. Every item taken
//! produces exactly one result, including when inference fails or panics, so
//! the ordered reader never waits on a sequence that will not arrive.

use crate::inbox::{SequencedInbox, WorkItem};
use crate::outbox::{OutboxSender, ResultItem};
use crate::predictor::{Infer, WorkerContext};
use crossbeam::channel::Sender;
use orderline_common::error::{OrderlineError, Result};
use orderline_common::metrics::{LatencyTimer, PipelineMetrics};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// State every worker of one pipeline shares
pub(crate) struct WorkerShared<P, O> {
    pub pipeline: Uuid,
    pub inbox: Arc<SequencedInbox<P>>,
    pub outbox: OutboxSender<O>,
    pub metrics: PipelineMetrics,
}

impl<P, O> Clone for WorkerShared<P, O> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline,
            inbox: self.inbox.clone(),
            outbox: self.outbox.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// A running worker thread
pub(crate) struct WorkerHandle {
    pub context: WorkerContext,
    pub thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Wait for the worker thread to exit
    pub fn join(self) -> Result<()> {
        let index = self.context.index;
        self.thread.join().map_err(|payload| {
            OrderlineError::internal(format!(
                "worker {} died: {}",
                index,
                panic_message(payload.as_ref())
            ))
        })
    }
}

/// Spawn one worker thread.
///
/// The thread sends exactly one message on `ready`: `Ok` once its
/// collaborator is built, or the startup error, after which it exits.
pub(crate) fn spawn<P, O, I, F>(
    context: WorkerContext,
    shared: WorkerShared<P, O>,
    factory: Arc<F>,
    ready: Sender<Result<()>>,
    stack_kb: Option<usize>,
) -> Result<WorkerHandle>
where
    P: Send + 'static,
    O: Send + 'static,
    I: Infer<P, Output = O>,
    F: Fn(&WorkerContext) -> anyhow::Result<I> + Send + Sync + 'static,
{
    let mut builder = thread::Builder::new().name(format!("orderline-worker-{}", context.index));
    if let Some(kb) = stack_kb {
        builder = builder.stack_size(kb * 1024);
    }

    let thread = builder.spawn(move || {
        let built = panic::catch_unwind(AssertUnwindSafe(|| factory(&context)));
        let collaborator = match built {
            Ok(Ok(collaborator)) => collaborator,
            Ok(Err(e)) => {
                let message = format!("{:#}", e);
                error!(pipeline = %shared.pipeline, worker = context.index, "Collaborator construction failed: {}", message);
                let _ = ready.send(Err(OrderlineError::worker_startup(context.index, message)));
                return;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(pipeline = %shared.pipeline, worker = context.index, "Collaborator construction panicked: {}", message);
                let _ = ready.send(Err(OrderlineError::worker_startup(context.index, message)));
                return;
            }
        };

        let _ = ready.send(Ok(()));
        drop(ready);
        run(context, &shared, collaborator);
    })?;

    Ok(WorkerHandle { context, thread })
}

/// Worker main loop
fn run<P, O, I>(context: WorkerContext, shared: &WorkerShared<P, O>, mut collaborator: I)
where
    I: Infer<P, Output = O>,
{
    let metrics = &shared.metrics;
    metrics.active_workers.inc();
    info!(pipeline = %shared.pipeline, worker = context.index, device = %context.device, "Worker started");

    let mut processed = 0u64;
    while let Some(item) = shared.inbox.pop() {
        metrics.inbox_depth.dec();
        let WorkItem {
            sequence,
            payload,
            enqueued_at,
        } = item;

        debug!(
            pipeline = %shared.pipeline,
            worker = context.index,
            sequence,
            queued_us = enqueued_at.elapsed().as_micros() as u64,
            "Dispatching item"
        );

        let outcome = metrics
            .infer_duration
            .time(|| panic::catch_unwind(AssertUnwindSafe(|| collaborator.infer(payload))));

        let outcome = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(pipeline = %shared.pipeline, worker = context.index, sequence, "Inference failed: {:#}", e);
                Err(OrderlineError::inference(sequence, format!("{:#}", e)))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(pipeline = %shared.pipeline, worker = context.index, sequence, "Inference panicked: {}", message);
                Err(OrderlineError::worker_panic(sequence, message))
            }
        };

        if outcome.is_err() {
            metrics.failed.inc();
        }
        metrics.completed.inc();
        processed += 1;

        if shared.outbox.push(ResultItem { sequence, outcome }).is_err() {
            // Receiver gone: the pipeline was dropped without draining.
            debug!(pipeline = %shared.pipeline, worker = context.index, "Outbox closed, stopping");
            break;
        }
        trace!(pipeline = %shared.pipeline, worker = context.index, sequence, "Result published");
    }

    metrics.active_workers.dec();
    info!(pipeline = %shared.pipeline, worker = context.index, processed, "Worker stopped");
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
