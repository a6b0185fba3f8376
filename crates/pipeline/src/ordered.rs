//! Streaming adapter over a pipeline
//!
//! Feeds an input iterator into the pipeline, keeps a fixed number of items
//! in flight and yields outputs in input order. This is the usual way to run
//! a video-like stream: the first output arrives after `depth` inputs have
//! been queued, then one input goes in for every output that comes out.

use crate::pipeline::AsyncPipeline;
use orderline_common::error::{OrderlineError, Result};
use std::iter::FusedIterator;
use tracing::warn;

/// Iterator returned by [`AsyncPipeline::map_ordered`]
///
/// The adapter assumes it is the only user of the pipeline while it runs;
/// results of items submitted elsewhere would be interleaved into its output.
///
/// If a submit fails, feeding stops: every output already in flight is still
/// yielded in order, then the submit error is yielded once as the last item.
pub struct OrderedMap<'a, P, O, It> {
    pipeline: &'a AsyncPipeline<P, O>,
    inputs: It,
    depth: usize,
    in_flight: usize,
    inputs_done: bool,
    /// Submit failure held back until the in-flight outputs are out
    deferred: Option<OrderlineError>,
}

impl<'a, P, O, It> OrderedMap<'a, P, O, It>
where
    It: Iterator<Item = P>,
{
    /// Wrap `inputs`, keeping at most `depth` items in flight (minimum 1)
    pub fn new(pipeline: &'a AsyncPipeline<P, O>, inputs: It, depth: usize) -> Self {
        Self {
            pipeline,
            inputs,
            depth: depth.max(1),
            in_flight: 0,
            inputs_done: false,
            deferred: None,
        }
    }

    /// Use a different in-flight depth
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }

    /// Items submitted but not yet yielded
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl<'a, P, O, It> Iterator for OrderedMap<'a, P, O, It>
where
    It: Iterator<Item = P>,
{
    type Item = Result<O>;

    fn next(&mut self) -> Option<Result<O>> {
        while !self.inputs_done && self.in_flight < self.depth {
            match self.inputs.next() {
                Some(input) => match self.pipeline.submit(input) {
                    Ok(_) => self.in_flight += 1,
                    Err(e) => {
                        warn!(pipeline = %self.pipeline.id(), in_flight = self.in_flight, "Stopped feeding ordered stream: {}", e);
                        self.inputs_done = true;
                        self.deferred = Some(e);
                    }
                },
                None => self.inputs_done = true,
            }
        }

        if self.in_flight == 0 {
            return self.deferred.take().map(Err);
        }

        let result = self.pipeline.retrieve();
        match &result {
            Err(e) if !e.is_item_failure() => {
                // The pipeline itself is gone; nothing else will arrive.
                self.in_flight = 0;
                self.inputs_done = true;
                self.deferred = None;
            }
            _ => self.in_flight -= 1,
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.inputs.size_hint();
        if self.inputs_done {
            let remaining = self.in_flight + usize::from(self.deferred.is_some());
            (remaining, Some(remaining))
        } else {
            (
                self.in_flight.saturating_add(lower),
                upper.and_then(|upper| upper.checked_add(self.in_flight)),
            )
        }
    }
}

impl<'a, P, O, It> FusedIterator for OrderedMap<'a, P, O, It> where It: Iterator<Item = P> {}
