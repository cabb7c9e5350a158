//! Service metrics.

mod collector;
mod prometheus;

pub use collector::{MetricsCollector, size_bucket};
pub use prometheus::PrometheusExporter;
