//! APM agent core
//!
//! Correlates the instrumentation events of one logical unit of work (an HTTP
//! request, a background job) into a single transaction, scrubs it, classifies
//! it and hands the resulting record to an external dispatcher.
//!
//! # Flow
//!
//! 1. An adapter calls [`Agent::create`] when a unit of work starts.
//! 2. Hooks record into the returned [`TransactionHandle`]: events, the
//!    primary span, a failure.
//! 3. The adapter calls [`Agent::complete`]; the transaction leaves the
//!    registry and is sanitized, classified, formatted and enqueued on the
//!    [`DeliveryQueue`].
//!
//! Independently, a [`ProbeRunner`] samples runtime metrics on its own
//! schedule.
//!
//! # Guarantees
//!
//! - One live transaction per execution context.
//! - A transaction is handed off at most once.
//! - Completion never blocks on delivery: a full queue drops the record.
//! - Faults inside sanitizing, formatting or probing drop data; they never
//!   propagate into the host.

pub mod config;
pub mod delivery;
pub mod error;
pub mod probes;
pub mod registry;
pub mod sanitizer;
pub mod telemetry;
pub mod transaction;

use std::sync::Arc;

use tracing::{debug, warn};

pub use config::AgentConfig;
pub use delivery::{DeliveryError, DeliveryQueue};
pub use error::TelemetryError;
pub use probes::{AgentProbe, ProbeRunner, ProcessProbe};
pub use registry::{ContextKey, Registry, TransactionHandle};
pub use sanitizer::{Sanitizer, Value};
pub use transaction::{Classification, Event, Failure, Transaction, TransactionRecord};

use telemetry::{
    record_transaction_completed, record_transaction_dropped, MetricSink, MetricsStore, SpanExt,
    TransactionSpan,
};
use transaction::{to_record, CgiContextAccessor, Context, ContextAccessor};

/// What happened to a completed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Record enqueued for delivery.
    Dispatched,
    /// Neither a primary span nor a failure: nothing to report.
    Discarded,
    /// Record lost: the delivery queue was full or closed.
    Dropped,
}

/// Result of [`Agent::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: String,
    pub classification: Classification,
    pub outcome: CompletionOutcome,
    pub truncated: bool,
}

/// The agent core: registry, completion pipeline and delivery handoff.
pub struct Agent {
    config: AgentConfig,
    registry: Arc<Registry>,
    sanitizer: Sanitizer,
    accessor: Arc<dyn ContextAccessor>,
    delivery: Arc<DeliveryQueue>,
    metrics: Arc<MetricsStore>,
}

impl Agent {
    /// Create an agent with the CGI context accessor.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            sanitizer: Sanitizer::new(config.sanitizer.clone()),
            registry: Arc::new(Registry::new()),
            accessor: Arc::new(CgiContextAccessor),
            delivery: Arc::new(DeliveryQueue::new(config.delivery.clone())),
            metrics: Arc::new(MetricsStore::new()),
            config,
        }
    }

    /// Replace the accessor used to read session data and paths.
    pub fn with_accessor(mut self, accessor: Arc<dyn ContextAccessor>) -> Self {
        self.accessor = accessor;
        self
    }

    /// Replace the metrics store (e.g. a detached one in tests).
    pub fn with_metrics(mut self, metrics: Arc<MetricsStore>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn delivery(&self) -> &Arc<DeliveryQueue> {
        &self.delivery
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    /// Start a transaction for `context`. See [`Registry::create`].
    pub fn create(
        &self,
        context: impl Into<ContextKey>,
        id: impl Into<String>,
        raw_context: Context,
    ) -> Result<TransactionHandle, TelemetryError> {
        self.registry.create(context, id, raw_context)
    }

    /// Current transaction of `context`, if any.
    pub fn current(&self, context: impl Into<ContextKey>) -> Option<TransactionHandle> {
        self.registry.current(context)
    }

    /// Finish the transaction bound to `context` and hand it to delivery.
    ///
    /// Returns `None` if nothing was bound. Never blocks on delivery.
    pub fn complete(&self, context: impl Into<ContextKey>) -> Option<Completion> {
        let mut transaction = self.registry.complete(context)?;
        let span = TransactionSpan::new(transaction.id());
        let _entered = span.enter();

        let threshold = self.config.transactions.slow_threshold;
        let classification = transaction.classify(threshold);
        span.record("kind", classification.as_str());
        span.record("events", transaction.event_count());

        if transaction.primary_span().is_none() && !transaction.is_failed() {
            debug!("Nothing to report, discarding transaction");
            self.metrics.increment_counter("transactions_discarded", 1);
            return Some(Completion {
                id: transaction.id().to_string(),
                classification,
                outcome: CompletionOutcome::Discarded,
                truncated: false,
            });
        }

        transaction.sanitize(&self.sanitizer, self.accessor.as_ref());
        if transaction.event_count() > self.config.transactions.max_events {
            warn!(
                events = transaction.event_count(),
                max_events = self.config.transactions.max_events,
                "Transaction too large, truncating"
            );
            transaction.truncate();
            self.metrics.increment_counter("transactions_truncated", 1);
        }

        let id = transaction.id().to_string();
        let truncated = transaction.is_truncated();
        let result = to_record(&transaction, threshold);
        drop(transaction);

        let enqueued = result
            .map_err(|e| e.to_string())
            .and_then(|record| self.delivery.try_enqueue(record).map_err(|e| e.to_string()));
        span.record_result(&enqueued);

        let outcome = match enqueued {
            Ok(()) => {
                record_transaction_completed(classification.as_str());
                self.metrics.increment_counter("transactions_completed", 1);
                CompletionOutcome::Dispatched
            }
            Err(reason) => {
                warn!(reason = %reason, "Transaction record dropped");
                record_transaction_dropped("delivery");
                self.metrics.increment_counter("transactions_dropped", 1);
                CompletionOutcome::Dropped
            }
        };

        Some(Completion {
            id,
            classification,
            outcome,
            truncated,
        })
    }

    /// Build a probe runner emitting into this agent's metrics store, with the
    /// built-in probes installed when their dependencies are present.
    pub fn probe_runner(&self) -> Arc<ProbeRunner> {
        let sink: Arc<dyn MetricSink> = self.metrics.clone();
        let runner = ProbeRunner::new(sink);
        runner.register(Arc::new(ProcessProbe::new()));
        runner.register(Arc::new(AgentProbe::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.delivery),
        )));
        Arc::new(runner)
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}
