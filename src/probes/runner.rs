//! Background loop driving registered probes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Probe, ProbeError};
use crate::telemetry::{probe_tick_span, record_probe_failure, MetricSink};

/// Tag key carrying the metric name on every emitted value.
pub const METRIC_TAG: &str = "metric";

/// Outcome of one sampling round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Values forwarded to the sink.
    pub emitted: usize,
    /// Probes whose `sample()` failed or panicked.
    pub failed: usize,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Samples every registered probe once per interval.
pub struct ProbeRunner {
    probes: RwLock<Vec<Arc<dyn Probe>>>,
    sink: Arc<dyn MetricSink>,
    running: Mutex<Option<RunningLoop>>,
}

impl ProbeRunner {
    pub fn new(sink: Arc<dyn MetricSink>) -> Self {
        Self {
            probes: RwLock::new(Vec::new()),
            sink,
            running: Mutex::new(None),
        }
    }

    /// Install a probe if its dependencies are present. Returns whether it was installed.
    pub fn register(&self, probe: Arc<dyn Probe>) -> bool {
        if !probe.dependencies_present() {
            debug!(probe = probe.name(), "Probe dependencies missing, not installed");
            return false;
        }
        info!(probe = probe.name(), namespace = probe.namespace(), "Probe installed");
        self.probes.write().push(probe);
        true
    }

    pub fn probe_count(&self) -> usize {
        self.probes.read().len()
    }

    /// Run one sampling round over every probe.
    ///
    /// A failing probe is logged and counted; the others still emit.
    pub fn tick(&self) -> TickReport {
        let probes: Vec<Arc<dyn Probe>> = self.probes.read().clone();
        let span = probe_tick_span(probes.len());
        let _entered = span.enter();

        let mut report = TickReport::default();
        for probe in &probes {
            match sample_guarded(probe.as_ref()) {
                Ok(samples) => {
                    for sample in samples {
                        self.sink.add_distribution_value(
                            probe.namespace(),
                            sample.value,
                            &[(METRIC_TAG, sample.metric.as_str())],
                        );
                        report.emitted += 1;
                    }
                }
                Err(e) => {
                    warn!(probe = probe.name(), error = %e, "Probe sample failed");
                    record_probe_failure(probe.name());
                    self.sink.increment_counter("probe_failures", 1);
                    report.failed += 1;
                }
            }
        }
        span.record("failed", report.failed);
        report
    }

    /// Start the sampling loop on the current Tokio runtime.
    ///
    /// Returns false if the loop is already running or no runtime is available.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().map_or(false, |r| !r.handle.is_finished()) {
            debug!("Probe runner already started");
            return false;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No Tokio runtime, probe runner not started");
                return false;
            }
        };

        let cancel = CancellationToken::new();
        let runner = Arc::downgrade(self);
        let token = cancel.clone();
        let interval = interval.max(Duration::from_millis(1));
        let handle = runtime.spawn(Self::run(runner, interval, token));

        info!(interval_ms = interval.as_millis() as u64, probes = self.probe_count(), "Probe runner started");
        *running = Some(RunningLoop { cancel, handle });
        true
    }

    /// The loop only holds a weak reference: dropping the last handle ends it.
    async fn run(runner: Weak<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(runner) = runner.upgrade() else {
                        break;
                    };
                    // Probes may block on system calls.
                    if let Err(e) = tokio::task::spawn_blocking(move || runner.tick()).await {
                        warn!(error = %e, "Probe tick aborted");
                    }
                }
            }
        }
        debug!("Probe runner loop exited");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map_or(false, |r| !r.handle.is_finished())
    }

    /// Signal the loop to stop and wait for it. An in-flight tick finishes first.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(RunningLoop { cancel, handle }) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Probe runner loop ended abnormally");
            }
            info!("Probe runner stopped");
        }
    }
}

impl Drop for ProbeRunner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

fn sample_guarded(probe: &dyn Probe) -> Result<Vec<super::Sample>, ProbeError> {
    catch_unwind(AssertUnwindSafe(|| probe.sample())).unwrap_or_else(|_| {
        Err(ProbeError::Panicked {
            probe: probe.name().to_string(),
        })
    })
}
