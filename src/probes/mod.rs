//! Periodic runtime probes.
//!
//! Probes sample a runtime subsystem and emit distribution values directly
//! to a [`MetricSink`](crate::telemetry::MetricSink), independent of any
//! transaction.

mod agent;
mod process;
mod runner;

pub use agent::AgentProbe;
pub use process::ProcessProbe;
pub use runner::{ProbeRunner, TickReport, METRIC_TAG};

use thiserror::Error;

/// One sampled metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: String,
    pub value: f64,
}

impl Sample {
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
        }
    }
}

/// Failure of a single `sample()` call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Probe {probe} unavailable: {reason}")]
    Unavailable { probe: String, reason: String },

    #[error("Probe {probe} failed: {reason}")]
    Sample { probe: String, reason: String },

    #[error("Probe {probe} panicked")]
    Panicked { probe: String },
}

/// A pluggable sampler of one runtime subsystem.
///
/// Probes share no mutable state with each other.
pub trait Probe: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    /// Metric key under which samples are emitted, e.g. `runtime_process`.
    fn namespace(&self) -> &str;

    /// Checked once at registration; absent probes are never installed.
    fn dependencies_present(&self) -> bool {
        true
    }

    /// Take one set of readings.
    fn sample(&self) -> Result<Vec<Sample>, ProbeError>;
}
