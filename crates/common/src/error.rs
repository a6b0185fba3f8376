//! Common error types for Orderline
//!
//! This module defines the error type shared by the pipeline and its
//! configuration layer. Per-item failures carry the sequence number of the
//! item they belong to so they can be delivered in order like any result.

use std::num::ParseIntError;
use thiserror::Error;

/// Main error type for Orderline
#[derive(Error, Debug)]
pub enum OrderlineError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The inference collaborator returned an error for one item
    #[error("Inference failed for item {sequence}: {message}")]
    Inference { sequence: u64, message: String },

    /// The inference collaborator panicked while processing one item
    #[error("Worker panicked on item {sequence}: {message}")]
    WorkerPanic { sequence: u64, message: String },

    /// A worker could not construct its inference collaborator
    #[error("Worker {worker} failed to start: {message}")]
    WorkerStartup { worker: usize, message: String },

    /// The pipeline no longer accepts or produces items
    #[error("Pipeline closed: {0}")]
    Closed(String),

    /// Admission limit reached (backpressure)
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A result for an already buffered or already delivered sequence
    #[error("Duplicate result for sequence {0}")]
    DuplicateSequence(u64),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ParseIntError> for OrderlineError {
    fn from(err: ParseIntError) -> Self {
        OrderlineError::Parse(err.to_string())
    }
}

impl OrderlineError {
    /// Whether this error belongs to a single item rather than the pipeline.
    ///
    /// Item failures consume their turn in the delivery order; the next
    /// retrieve moves on to the following sequence.
    pub fn is_item_failure(&self) -> bool {
        matches!(
            self,
            OrderlineError::Inference { .. } | OrderlineError::WorkerPanic { .. }
        )
    }

    /// Sequence number of the failed item, if this is an item failure
    pub fn sequence(&self) -> Option<u64> {
        match self {
            OrderlineError::Inference { sequence, .. }
            | OrderlineError::WorkerPanic { sequence, .. } => Some(*sequence),
            OrderlineError::DuplicateSequence(sequence) => Some(*sequence),
            _ => None,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        OrderlineError::Config(msg.into())
    }

    /// Create an inference error for one item
    pub fn inference(sequence: u64, msg: impl Into<String>) -> Self {
        OrderlineError::Inference {
            sequence,
            message: msg.into(),
        }
    }

    /// Create a worker panic error for one item
    pub fn worker_panic(sequence: u64, msg: impl Into<String>) -> Self {
        OrderlineError::WorkerPanic {
            sequence,
            message: msg.into(),
        }
    }

    /// Create a worker startup error
    pub fn worker_startup(worker: usize, msg: impl Into<String>) -> Self {
        OrderlineError::WorkerStartup {
            worker,
            message: msg.into(),
        }
    }

    /// Create a closed error
    pub fn closed(msg: impl Into<String>) -> Self {
        OrderlineError::Closed(msg.into())
    }

    /// Create a queue full error
    pub fn queue_full(msg: impl Into<String>) -> Self {
        OrderlineError::QueueFull(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        OrderlineError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        OrderlineError::Internal(msg.into())
    }
}

/// Result type alias for Orderline operations
pub type Result<T> = std::result::Result<T, OrderlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_failures_carry_sequence() {
        let err = OrderlineError::inference(7, "bad input");
        assert!(err.is_item_failure());
        assert_eq!(err.sequence(), Some(7));
        assert_eq!(err.to_string(), "Inference failed for item 7: bad input");

        let err = OrderlineError::worker_panic(3, "index out of bounds");
        assert!(err.is_item_failure());
        assert_eq!(err.sequence(), Some(3));
    }

    #[test]
    fn test_pipeline_errors_are_not_item_failures() {
        assert!(!OrderlineError::closed("shut down").is_item_failure());
        assert!(!OrderlineError::timeout("retrieve").is_item_failure());
        assert!(!OrderlineError::DuplicateSequence(4).is_item_failure());
        assert_eq!(OrderlineError::queue_full("limit 8").sequence(), None);
    }

    #[test]
    fn test_parse_int_conversion() {
        let err: OrderlineError = "abc".parse::<usize>().unwrap_err().into();
        assert!(matches!(err, OrderlineError::Parse(_)));
    }
}
