//! Ordering restoration
//!
//! Results leave the workers in completion order. The reorder buffer holds
//! every result that arrives before its turn, keyed by sequence, and hands
//! results out strictly by `next_wanted`. Buffering is unbounded: a burst of
//! fast late items waits for the slow early one.

use crate::inbox::Sequence;
use crate::outbox::ResultItem;
use orderline_common::error::{OrderlineError, Result};
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// Results that completed out of turn, plus the next sequence to deliver
pub struct ReorderBuffer<O> {
    held: BTreeMap<Sequence, ResultItem<O>>,
    next_wanted: Sequence,
}

impl<O> ReorderBuffer<O> {
    /// Empty buffer waiting for sequence 1
    pub fn new() -> Self {
        Self {
            held: BTreeMap::new(),
            next_wanted: 1,
        }
    }

    /// Sequence the next delivery must carry
    pub fn next_wanted(&self) -> Sequence {
        self.next_wanted
    }

    /// Number of sequences delivered so far
    pub fn delivered(&self) -> u64 {
        self.next_wanted - 1
    }

    /// Results currently held back
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether nothing is held back
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Hold a result that arrived before its turn.
    ///
    /// Each sequence is produced exactly once, so a second result for a held
    /// or already delivered sequence is an invariant violation and is
    /// rejected rather than overwriting anything.
    pub fn insert(&mut self, item: ResultItem<O>) -> Result<()> {
        let sequence = item.sequence;
        if sequence < self.next_wanted || self.held.contains_key(&sequence) {
            warn!(
                sequence,
                next_wanted = self.next_wanted,
                already_delivered = sequence < self.next_wanted,
                "Rejecting duplicate result"
            );
            return Err(OrderlineError::DuplicateSequence(sequence));
        }

        trace!(sequence, next_wanted = self.next_wanted, "Holding result out of turn");
        self.held.insert(sequence, item);
        Ok(())
    }

    /// Remove and return the held result for `next_wanted`, if present
    pub fn take_next(&mut self) -> Option<ResultItem<O>> {
        let item = self.held.remove(&self.next_wanted)?;
        self.next_wanted += 1;
        Some(item)
    }

    /// Deliver the next result in sequence order.
    ///
    /// Serves from the buffer when the wanted result is already held;
    /// otherwise keeps pulling from `source`, holding everything that is not
    /// the wanted sequence, until the wanted one arrives. An error from
    /// `source` is returned as is and leaves the buffer and `next_wanted`
    /// untouched, so a later call picks up where this one stopped.
    pub fn resolve<F>(&mut self, mut source: F) -> Result<ResultItem<O>>
    where
        F: FnMut() -> Result<ResultItem<O>>,
    {
        if let Some(item) = self.take_next() {
            return Ok(item);
        }

        loop {
            let item = source()?;
            if item.sequence == self.next_wanted {
                self.next_wanted += 1;
                return Ok(item);
            }
            self.insert(item)?;
        }
    }
}

impl<O> Default for ReorderBuffer<O> {
    fn default() -> Self {
        Self::new()
    }
}
