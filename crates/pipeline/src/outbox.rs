//! Completion-ordered result queue
//!
//! Workers publish here as soon as an item finishes, so this is where
//! out-of-order completions surface. The queue is a crossbeam channel:
//! every worker holds a sender, the pipeline holds the only receiver, and the
//! channel disconnects once the last worker has exited.

use crate::inbox::Sequence;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use orderline_common::error::{OrderlineError, Result};
use std::time::{Duration, Instant};

/// Outcome of one work item, tagged with the item's sequence number
#[derive(Debug)]
pub struct ResultItem<O> {
    /// Sequence of the work item this result belongs to
    pub sequence: Sequence,

    /// Inference output, or the item-level failure
    pub outcome: Result<O>,
}

impl<O> ResultItem<O> {
    /// Successful result
    pub fn ok(sequence: Sequence, value: O) -> Self {
        Self {
            sequence,
            outcome: Ok(value),
        }
    }

    /// Failed result
    pub fn failed(sequence: Sequence, error: OrderlineError) -> Self {
        Self {
            sequence,
            outcome: Err(error),
        }
    }
}

/// Create a connected sender/outbox pair
pub fn channel<O>() -> (OutboxSender<O>, UnorderedOutbox<O>) {
    let (tx, rx) = channel::unbounded();
    (OutboxSender { tx }, UnorderedOutbox { rx })
}

/// Worker side of the outbox
pub struct OutboxSender<O> {
    tx: Sender<ResultItem<O>>,
}

impl<O> Clone for OutboxSender<O> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<O> OutboxSender<O> {
    /// Publish a finished item.
    ///
    /// Fails only when the receiving pipeline is gone, in which case nobody
    /// can observe the result anyway.
    pub fn push(&self, item: ResultItem<O>) -> Result<()> {
        self.tx
            .send(item)
            .map_err(|e| OrderlineError::closed(format!("outbox dropped result {}", e.0.sequence)))
    }
}

/// Receiving side of the outbox, owned by the pipeline
pub struct UnorderedOutbox<O> {
    rx: Receiver<ResultItem<O>>,
}

impl<O> UnorderedOutbox<O> {
    /// Take the next completed result, blocking until one is available.
    ///
    /// Returns [`OrderlineError::Closed`] only after every worker has exited
    /// and all published results have been taken.
    pub fn pop(&self) -> Result<ResultItem<O>> {
        self.rx
            .recv()
            .map_err(|_| OrderlineError::closed("all workers have exited"))
    }

    /// Like [`pop`](Self::pop), but gives up at `deadline`
    pub fn pop_until(&self, deadline: Instant) -> Result<ResultItem<O>> {
        self.rx.recv_deadline(deadline).map_err(|e| match e {
            RecvTimeoutError::Timeout => OrderlineError::timeout("no result before deadline"),
            RecvTimeoutError::Disconnected => OrderlineError::closed("all workers have exited"),
        })
    }

    /// Like [`pop`](Self::pop), but gives up after `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Result<ResultItem<O>> {
        self.pop_until(Instant::now() + timeout)
    }

    /// Results published but not yet taken
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no results are waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
