//! Observability module for metrics and logging.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use metrics::{
    DeadLetterOutcome, DefaultMetricsCollector, MetricsCollector, NoopMetricsCollector,
    ServiceMetrics,
};
