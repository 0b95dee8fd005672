//! Metric emission through the `metrics` facade.
//!
//! Whatever recorder the host installs receives these values; without one
//! the macros are no-ops.

use metrics::Label;

/// Destination for metric values produced by the core.
pub trait MetricSink: Send + Sync {
    /// Record one value of a distribution, tagged with `tags`.
    fn add_distribution_value(&self, key: &str, value: f64, tags: &[(&str, &str)]);

    /// Increment a counter.
    fn increment_counter(&self, key: &str, value: u64);
}

/// Sink that forwards straight to the installed `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeSink;

impl MetricSink for FacadeSink {
    fn add_distribution_value(&self, key: &str, value: f64, tags: &[(&str, &str)]) {
        metrics::histogram!(key.to_string(), labels(tags)).record(value);
    }

    fn increment_counter(&self, key: &str, value: u64) {
        metrics::counter!(key.to_string()).increment(value);
    }
}

fn labels(tags: &[(&str, &str)]) -> Vec<Label> {
    tags.iter()
        .map(|(k, v)| Label::new(k.to_string(), v.to_string()))
        .collect()
}

/// Describe the metrics emitted by the core.
pub fn init_metrics() {
    metrics::describe_counter!(
        "apm_transactions_completed_total",
        "Transactions handed to delivery, by kind"
    );
    metrics::describe_counter!(
        "apm_transactions_dropped_total",
        "Transactions lost before delivery, by reason"
    );
    metrics::describe_counter!(
        "apm_probe_failures_total",
        "Probe sample() calls that failed, by probe"
    );
}

/// Record a transaction handed to delivery.
pub fn record_transaction_completed(kind: &'static str) {
    metrics::counter!("apm_transactions_completed_total", "kind" => kind).increment(1);
}

/// Record a transaction lost before delivery.
pub fn record_transaction_dropped(reason: &'static str) {
    metrics::counter!("apm_transactions_dropped_total", "reason" => reason).increment(1);
}

/// Record a failed probe sample.
pub fn record_probe_failure(probe: &str) {
    metrics::counter!("apm_probe_failures_total", "probe" => probe.to_string()).increment(1);
}
