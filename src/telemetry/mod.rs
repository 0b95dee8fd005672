//! Telemetry about the agent itself.
//!
//! Structured logging, tracing spans and metric emission. Probe values and
//! pipeline counters go through [`MetricSink`].

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    init_metrics, record_probe_failure, record_transaction_completed, record_transaction_dropped,
    FacadeSink, MetricSink,
};
pub use spans::{probe_tick_span, SpanExt, TransactionSpan};
pub use store::{series_key, DistributionSummary, MetricsSnapshot, MetricsStore};
