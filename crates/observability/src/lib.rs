//! Tracing, logging, metrics (shared setup).

/// Tracing subscriber configuration (filters, output format).
pub mod tracing;

/// Prometheus registry and HTTP metrics.
pub mod metrics;

pub use metrics::HttpMetrics;
pub use tracing::{LogFormat, init};
