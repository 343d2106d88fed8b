//! Observability infrastructure

pub mod metrics;
pub mod stats;
pub mod tracing_setup;

pub use metrics::{PrometheusMetrics, init_metrics};
pub use stats::{NamespaceStats, StatsCollector, StatsSnapshot};
pub use tracing_setup::init_tracing;
