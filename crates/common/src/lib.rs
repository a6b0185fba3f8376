//! Orderline common library
//!
//! This crate contains the error type, configuration and metrics shared by
//! the Orderline pipeline and its binaries.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::{OrderlineConfig, PipelineConfig};
pub use error::{OrderlineError, Result};
pub use metrics::{LatencyTimer, PipelineMetrics};
