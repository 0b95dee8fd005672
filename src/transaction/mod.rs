//! Transactions: one record per logical unit of work.
//!
//! A transaction is mutated only by its owning execution context until the
//! registry hands it off. After that it is sanitized, classified and formatted
//! exactly once.

mod classify;
mod context;
mod event;
mod formatter;

pub use classify::{classify, Classification};
pub use context::{
    is_allowed_context_key, CgiContextAccessor, Context, ContextAccessor, ALLOWED_CONTEXT_KEYS,
};
pub use event::Event;
pub use formatter::{to_record, EventRecord, FailureRecord, TransactionRecord};

use std::error::Error as StdError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::warn;

use crate::error::TelemetryError;
use crate::sanitizer::{Sanitizer, Value};

/// Failure recorded on a transaction.
///
/// This is data about the host application, never a control-flow error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: String,
    pub message: String,
    /// Messages from the `source()` chain, outermost first.
    pub causes: Vec<String>,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Capture an error's type name, message and source chain.
    ///
    /// The kind is the static type's last path segment without generic
    /// arguments. A trait object only names its trait (`dyn Error` gives
    /// `"Error"`), so callers holding one should build the failure with
    /// [`Failure::new`] and their own kind.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        let kind = short_type_name(std::any::type_name::<E>());
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: kind.to_string(),
            message: error.to_string(),
            causes,
        }
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    let base = base.split(" + ").next().unwrap_or(base);
    let base = base.trim_start_matches("dyn ");
    base.rsplit("::").next().unwrap_or(base)
}

/// Aggregate of all events for one unit of work.
#[derive(Debug)]
pub struct Transaction {
    id: String,
    created_at: DateTime<Utc>,
    events: Vec<Event>,
    primary_span: Option<Event>,
    action: Option<String>,
    failure: Option<Failure>,
    failure_time: Option<DateTime<Utc>>,
    raw_context: Context,
    sanitized_context: JsonMap<String, JsonValue>,
    sanitized_session_data: JsonMap<String, JsonValue>,
    full_path: Option<String>,
    /// Context-derived fields computed and raw context discarded.
    sanitized: bool,
    /// Payloads recorded since the last sanitize.
    dirty: bool,
    truncated: bool,
}

impl Transaction {
    pub fn new(id: impl Into<String>, raw_context: Context) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            events: Vec::new(),
            primary_span: None,
            action: None,
            failure: None,
            failure_time: None,
            raw_context,
            sanitized_context: JsonMap::new(),
            sanitized_session_data: JsonMap::new(),
            full_path: None,
            sanitized: false,
            dirty: false,
            truncated: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn primary_span(&self) -> Option<&Event> {
        self.primary_span.as_ref()
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn failure_time(&self) -> Option<DateTime<Utc>> {
        self.failure_time
    }

    pub fn raw_context(&self) -> &Context {
        &self.raw_context
    }

    pub fn sanitized_context(&self) -> &JsonMap<String, JsonValue> {
        &self.sanitized_context
    }

    pub fn sanitized_session_data(&self) -> &JsonMap<String, JsonValue> {
        &self.sanitized_session_data
    }

    pub fn full_path(&self) -> Option<&str> {
        self.full_path.as_deref()
    }

    /// True once sanitized and no payload was recorded since.
    pub fn is_sanitized(&self) -> bool {
        self.sanitized && !self.dirty
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Duration of the primary span in seconds.
    pub fn duration(&self) -> Option<f64> {
        self.primary_span.as_ref().and_then(Event::duration)
    }

    /// Append an event. Insertion order is causal order.
    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
        self.dirty = true;
    }

    /// Store the primary span and derive `controller#action` from its payload.
    ///
    /// A replaced span takes its action with it.
    pub fn set_primary_span(&mut self, event: Event) {
        let payload = event.payload();
        let controller = payload.get("controller").and_then(Value::as_label);
        let action = payload.get("action").and_then(Value::as_label);
        self.action = match (controller, action) {
            (Some(controller), Some(action)) => Some(format!("{}#{}", controller, action)),
            _ => None,
        };
        self.primary_span = Some(event);
        self.dirty = true;
    }

    /// Record a failure. A later call replaces an earlier one.
    pub fn add_failure(&mut self, failure: Failure) {
        self.failure_time = Some(Utc::now());
        self.failure = Some(failure);
    }

    /// Record a failure from any error value.
    pub fn add_error<E>(&mut self, error: &E)
    where
        E: StdError + ?Sized,
    {
        self.add_failure(Failure::from_error(error));
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// True iff the primary span lasted at least `threshold`.
    ///
    /// A transaction without a timed primary span is never slow.
    pub fn is_slow(&self, threshold: Duration) -> bool {
        self.duration()
            .map_or(false, |d| d >= threshold.as_secs_f64())
    }

    pub fn classify(&self, slow_threshold: Duration) -> Classification {
        classify(self, slow_threshold)
    }

    /// True when this transaction's primary span is strictly slower than `other`'s.
    pub fn is_slower_than(&self, other: &Transaction) -> Result<bool, TelemetryError> {
        let mine = self.comparable_duration()?;
        let theirs = other.comparable_duration()?;
        Ok(mine > theirs)
    }

    fn comparable_duration(&self) -> Result<f64, TelemetryError> {
        self.duration().ok_or_else(|| TelemetryError::Incomparable {
            id: self.id.clone(),
        })
    }

    /// Reduce every payload and the context to primitives, then drop the raw context.
    ///
    /// Payloads are rewritten in place. Context-derived fields are only
    /// computed on the first call; later calls leave them untouched.
    pub fn sanitize(&mut self, sanitizer: &Sanitizer, accessor: &dyn ContextAccessor) {
        if let Some(span) = self.primary_span.as_mut() {
            sanitizer.sanitize_in_place(span.payload_mut());
        }
        for event in &mut self.events {
            sanitizer.sanitize_in_place(event.payload_mut());
        }
        self.dirty = false;

        if !self.sanitized {
            let raw = std::mem::take(&mut self.raw_context);
            self.sanitized_context = raw
                .iter()
                .filter(|(key, _)| is_allowed_context_key(key))
                .map(|(key, value)| (key.clone(), sanitizer.sanitize(value)))
                .collect();

            self.sanitized_session_data = match self.read_context(|| accessor.session(&raw)) {
                Some(Some(Value::Map(session))) => sanitizer.sanitize_map(&session),
                Some(Some(other)) => {
                    let mut wrapped = JsonMap::new();
                    wrapped.insert("value".to_string(), sanitizer.sanitize(&other));
                    wrapped
                }
                _ => JsonMap::new(),
            };
            self.full_path = self.read_context(|| accessor.full_path(&raw)).flatten();
            self.sanitized = true;
        }
    }

    fn read_context<T>(&self, read: impl FnOnce() -> T) -> Option<T> {
        match catch_unwind(AssertUnwindSafe(read)) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(transaction_id = %self.id, "Context accessor panicked, dropping request details");
                None
            }
        }
    }

    /// Drop payloads, events and context to bound memory.
    ///
    /// Id, action, failure and primary span timing survive, so the
    /// classification is unchanged.
    pub fn truncate(&mut self) {
        if let Some(span) = self.primary_span.as_mut() {
            span.payload_mut().clear();
        }
        self.events.clear();
        self.events.shrink_to_fit();
        self.sanitized_context.clear();
        self.sanitized_session_data.clear();
        self.raw_context.clear();
        self.truncated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use crate::sanitizer::SanitizerConfig;

    fn threshold() -> Duration {
        Duration::from_millis(500)
    }

    fn span(duration: f64) -> Event {
        Event::with_fields("process_action", [("controller", "Posts"), ("action", "index")])
            .with_duration(duration)
    }

    #[test]
    fn action_derived_from_primary_span() {
        let mut t = Transaction::new("a", Context::new());
        t.set_primary_span(span(0.1));
        assert_eq!(t.action(), Some("Posts#index"));
    }

    #[test]
    fn replacing_span_replaces_action() {
        let mut t = Transaction::new("a", Context::new());
        t.set_primary_span(span(0.1));
        t.set_primary_span(Event::with_fields("perform_job", [("queue", "default")]));
        assert!(t.action().is_none());
        assert_eq!(t.primary_span().map(Event::name), Some("perform_job"));

        t.set_primary_span(
            Event::with_fields("process_action", [("controller", "Jobs"), ("action", "run")]),
        );
        assert_eq!(t.action(), Some("Jobs#run"));
    }

    #[test]
    fn action_requires_both_identifiers() {
        let mut t = Transaction::new("a", Context::new());
        t.set_primary_span(Event::with_fields("x", [("controller", "Posts")]));
        assert!(t.action().is_none());
        assert!(t.primary_span().is_some());
    }

    #[test]
    fn failure_beats_slowness() {
        let mut t = Transaction::new("a", Context::new());
        t.set_primary_span(span(2.0));
        assert_eq!(t.classify(threshold()), Classification::Slow);
        t.add_failure(Failure::new("Timeout", "took too long"));
        assert_eq!(t.classify(threshold()), Classification::Failed);
        assert!(t.failure_time().is_some());
    }

    #[test]
    fn no_primary_span_is_not_slow() {
        let t = Transaction::new("a", Context::new());
        assert!(!t.is_slow(Duration::ZERO));
        assert_eq!(t.classify(Duration::ZERO), Classification::Normal);
    }

    #[test]
    fn slow_threshold_is_inclusive() {
        let mut t = Transaction::new("a", Context::new());
        t.set_primary_span(span(0.5));
        assert!(t.is_slow(threshold()));
    }

    #[test]
    fn comparison_requires_primary_spans() {
        let mut fast = Transaction::new("fast", Context::new());
        fast.set_primary_span(span(0.1));
        let mut slow = Transaction::new("slow", Context::new());
        slow.set_primary_span(span(0.9));
        let bare = Transaction::new("bare", Context::new());

        assert_eq!(slow.is_slower_than(&fast), Ok(true));
        assert_eq!(fast.is_slower_than(&slow), Ok(false));
        assert_eq!(
            fast.is_slower_than(&bare),
            Err(TelemetryError::Incomparable { id: "bare".into() })
        );
    }

    #[test]
    fn failure_from_error_keeps_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let failure = Failure::from_error(&inner);
        assert_eq!(failure.kind, "Error");
        assert_eq!(failure.message, "disk gone");
    }

    #[derive(Debug)]
    struct Wrapped<T>(T);

    impl<T: fmt::Debug> fmt::Display for Wrapped<T> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped {:?}", self.0)
        }
    }

    impl<T: fmt::Debug> StdError for Wrapped<T> {}

    #[test]
    fn failure_kind_drops_generic_arguments() {
        let failure = Failure::from_error(&Wrapped(std::io::ErrorKind::TimedOut));
        assert_eq!(failure.kind, "Wrapped");

        let boxed: Box<dyn StdError + Send + Sync> = Box::new(Wrapped(1u8));
        assert_eq!(Failure::from_error(boxed.as_ref()).kind, "Error");
    }

    #[test]
    fn short_type_name_handles_paths() {
        assert_eq!(short_type_name("std::io::error::Error"), "Error");
        assert_eq!(short_type_name("app::Wrapped<std::io::error::Error>"), "Wrapped");
        assert_eq!(short_type_name("dyn core::error::Error + core::marker::Send"), "Error");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn sanitize_twice_keeps_context() {
        let sanitizer = Sanitizer::new(SanitizerConfig::default());
        let ctx = Context::from([
            ("REMOTE_ADDR".to_string(), Value::from("1.2.3.4")),
            ("PATH_INFO".to_string(), Value::from("/x")),
            (
                "session".to_string(),
                Value::map([("user_id", Value::from(7i64)), ("token", Value::from("t"))]),
            ),
        ]);
        let mut t = Transaction::new("a", ctx);
        t.sanitize(&sanitizer, &CgiContextAccessor);
        let first = t.sanitized_context().clone();
        let first_session = t.sanitized_session_data().clone();
        assert_eq!(first_session.len(), 2);
        t.sanitize(&sanitizer, &CgiContextAccessor);
        assert_eq!(t.sanitized_context(), &first);
        assert_eq!(t.sanitized_session_data(), &first_session);
        assert_eq!(t.full_path(), Some("/x"));
        assert!(t.raw_context().is_empty());
    }

    #[test]
    fn recording_after_sanitize_requires_another_pass() {
        let sanitizer = Sanitizer::default();
        let mut t = Transaction::new("a", Context::new());
        t.sanitize(&sanitizer, &CgiContextAccessor);
        assert!(t.is_sanitized());

        t.add_event(Event::with_fields("late", [("obj", Value::display('x'))]));
        assert!(!t.is_sanitized());
        assert_eq!(
            to_record(&t, threshold()).unwrap_err(),
            TelemetryError::NotSanitized { id: "a".into() }
        );

        t.sanitize(&sanitizer, &CgiContextAccessor);
        assert!(t.is_sanitized());
        assert_eq!(t.events()[0].payload()["obj"], Value::from("x"));

        t.set_primary_span(span(0.1));
        assert!(!t.is_sanitized());
    }

    #[test]
    fn truncate_keeps_identity_and_classification() {
        let mut t = Transaction::new("a", Context::new());
        t.set_primary_span(span(0.9));
        t.add_event(Event::with_fields("sql.query", [("sql", "SELECT 1")]));
        t.truncate();
        assert_eq!(t.event_count(), 0);
        assert!(t.primary_span().map_or(false, |s| s.payload().is_empty()));
        assert_eq!(t.action(), Some("Posts#index"));
        assert_eq!(t.classify(threshold()), Classification::Slow);
        assert!(t.is_truncated());
    }
}
