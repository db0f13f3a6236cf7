//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `logging`: tracing subscriber setup

pub mod metrics;
pub mod logging;

// Re-export for convenience
pub use metrics::*;
