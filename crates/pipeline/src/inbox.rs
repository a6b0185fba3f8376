//! Sequenced work queue shared by the submitter and all workers
//!
//! Sequence numbers are assigned under the same lock that appends the item,
//! so queue order always equals sequence order. Closing the inbox sets a
//! durable marker instead of enqueuing a sentinel item: every worker that
//! finds the queue empty after the close sees it, however many workers poll
//! and in whatever order.

use orderline_common::error::{OrderlineError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::trace;

/// Sequence number of a submitted item, starting at 1
pub type Sequence = u64;

/// A submitted input tagged with its submission order
#[derive(Debug)]
pub struct WorkItem<P> {
    /// Position in submission order
    pub sequence: Sequence,

    /// Caller input
    pub payload: P,

    /// When the item was queued
    pub enqueued_at: Instant,
}

struct InboxState<P> {
    items: VecDeque<WorkItem<P>>,
    last_sequence: Sequence,
    closed: bool,
}

/// FIFO of pending work items with blocking pop and a durable close marker
pub struct SequencedInbox<P> {
    state: Mutex<InboxState<P>>,
    available: Condvar,
}

impl<P> SequencedInbox<P> {
    /// Create an empty, open inbox
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InboxState {
                items: VecDeque::new(),
                last_sequence: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append a payload and return its sequence number.
    ///
    /// Fails with [`OrderlineError::Closed`] once [`close`](Self::close) has
    /// been called; nothing is ever queued behind the close marker.
    pub fn submit(&self, payload: P) -> Result<Sequence> {
        self.submit_with(payload, |_| Ok(()))
    }

    /// Like [`submit`](Self::submit), but runs `admit` under the queue lock
    /// first, with the number of items accepted so far.
    ///
    /// An error from `admit` rejects the payload without consuming a
    /// sequence number. Concurrent submitters are checked one at a time.
    pub fn submit_with<F>(&self, payload: P, admit: F) -> Result<Sequence>
    where
        F: FnOnce(u64) -> Result<()>,
    {
        let sequence = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(OrderlineError::closed("inbox no longer accepts items"));
            }
            admit(state.last_sequence)?;

            state.last_sequence += 1;
            let sequence = state.last_sequence;
            state.items.push_back(WorkItem {
                sequence,
                payload,
                enqueued_at: Instant::now(),
            });
            sequence
        };

        self.available.notify_one();
        trace!(sequence, "Item queued");
        Ok(sequence)
    }

    /// Take the next item, blocking while the inbox is empty and open.
    ///
    /// Items queued before the close are still handed out; `None` means the
    /// inbox is both empty and closed, and the caller should stop.
    pub fn pop(&self) -> Option<WorkItem<P>> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Set the durable close marker and wake every waiting worker
    pub fn close(&self) {
        let was_closed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.closed, true)
        };

        if !was_closed {
            trace!("Inbox closed");
        }
        self.available.notify_all();
    }

    /// Whether the close marker is set
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Items waiting for a worker
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no items are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of items ever accepted
    pub fn submitted(&self) -> u64 {
        self.state.lock().last_sequence
    }
}

impl<P> Default for SequencedInbox<P> {
    fn default() -> Self {
        Self::new()
    }
}
