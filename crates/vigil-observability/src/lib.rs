//! # vigil-observability
//!
//! Structured logging bootstrap and the metrics sink the sweep runners
//! report through.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::{InMemoryMetrics, MetricsSink, NullMetrics};
