//! Thread-safe in-process metrics storage.
//!
//! Complements the `metrics` facade: every value is kept here for snapshot
//! export and also forwarded to the facade for whatever recorder is installed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::metrics::{FacadeSink, MetricSink};

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub distributions: HashMap<String, DistributionSummary>,
}

impl MetricsSnapshot {
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }
}

/// Summary statistics for a distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

/// Distribution data with atomic fields (f64 bits stored as u64).
struct DistributionData {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    last: AtomicU64,
}

impl DistributionData {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(f64::to_bits(0.0)),
            min: AtomicU64::new(f64::to_bits(f64::MAX)),
            max: AtomicU64::new(f64::to_bits(f64::MIN)),
            last: AtomicU64::new(f64::to_bits(0.0)),
        }
    }

    fn record(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.last.store(f64::to_bits(value), Ordering::Relaxed);
        update_f64(&self.sum, |current| Some(current + value));
        update_f64(&self.min, |current| (value < current).then_some(value));
        update_f64(&self.max, |current| (value > current).then_some(value));
    }

    fn to_summary(&self) -> DistributionSummary {
        let count = self.count.load(Ordering::Relaxed);
        let load = |a: &AtomicU64| f64::from_bits(a.load(Ordering::Relaxed));

        DistributionSummary {
            count,
            sum: load(&self.sum),
            min: if count == 0 { 0.0 } else { load(&self.min) },
            max: if count == 0 { 0.0 } else { load(&self.max) },
            last: load(&self.last),
        }
    }
}

/// CAS loop over an f64 stored as bits. `next` returns `None` to leave it unchanged.
fn update_f64(atomic: &AtomicU64, next: impl Fn(f64) -> Option<f64>) {
    let _ = atomic.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
        next(f64::from_bits(bits)).map(f64::to_bits)
    });
}

/// Series key: `key` plus sorted tags, e.g. `runtime_process{metric=threads}`.
pub fn series_key(key: &str, tags: &[(&str, &str)]) -> String {
    if tags.is_empty() {
        return key.to_string();
    }
    let mut tags = tags.to_vec();
    tags.sort_unstable();
    let rendered: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}{{{}}}", key, rendered.join(","))
}

/// Thread-safe metrics store.
pub struct MetricsStore {
    counters: RwLock<HashMap<String, AtomicU64>>,
    distributions: RwLock<HashMap<String, DistributionData>>,
    forward: bool,
}

impl MetricsStore {
    /// Store that also forwards to the `metrics` facade.
    pub fn new() -> Self {
        Self::with_forwarding(true)
    }

    /// Store that keeps values local only.
    pub fn detached() -> Self {
        Self::with_forwarding(false)
    }

    fn with_forwarding(forward: bool) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            distributions: RwLock::new(HashMap::new()),
            forward,
        }
    }

    fn add_counter(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }

        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    fn add_distribution(&self, series: String, value: f64) {
        if let Some(data) = self.distributions.read().get(&series) {
            data.record(value);
            return;
        }

        self.distributions
            .write()
            .entry(series)
            .or_insert_with(DistributionData::new)
            .record(value);
    }

    /// Current summary of one distribution series.
    pub fn distribution(&self, key: &str, tags: &[(&str, &str)]) -> Option<DistributionSummary> {
        self.distributions
            .read()
            .get(&series_key(key, tags))
            .map(DistributionData::to_summary)
    }

    /// Current value of one counter.
    pub fn counter(&self, key: &str) -> u64 {
        self.counters
            .read()
            .get(key)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.read();
        let distributions = self.distributions.read();

        MetricsSnapshot {
            counters: counters
                .iter()
                .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                .collect(),
            distributions: distributions
                .iter()
                .map(|(k, v)| (k.clone(), v.to_summary()))
                .collect(),
        }
    }
}

impl MetricSink for MetricsStore {
    fn add_distribution_value(&self, key: &str, value: f64, tags: &[(&str, &str)]) {
        self.add_distribution(series_key(key, tags), value);
        if self.forward {
            FacadeSink.add_distribution_value(key, value, tags);
        }
    }

    fn increment_counter(&self, key: &str, value: u64) {
        self.add_counter(key, value);
        if self.forward {
            FacadeSink.increment_counter(key, value);
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}
