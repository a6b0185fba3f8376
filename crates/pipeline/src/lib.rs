//! Orderline Pipeline
//!
//! Multi-worker inference pipeline that hands results back in submission
//! order. Inputs go into a sequenced inbox, a pool of worker threads runs an
//! opaque inference collaborator on them, and a reorder buffer restores the
//! original order on the way out.

pub mod inbox;
pub mod ordered;
pub mod outbox;
pub mod pipeline;
pub mod predictor;
pub mod reorder;
pub mod simulate;
mod worker;

pub use inbox::{Sequence, SequencedInbox, WorkItem};
pub use ordered::OrderedMap;
pub use outbox::{ResultItem, UnorderedOutbox};
pub use pipeline::AsyncPipeline;
pub use predictor::{Device, Infer, InlinePredictor, Predictor, WorkerContext};
pub use reorder::ReorderBuffer;
