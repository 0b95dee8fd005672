//! Span utilities for the completion pipeline.

use tracing::{info_span, Span};

/// Extension trait for recording outcomes on spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for transaction completion spans.
pub struct TransactionSpan;

impl TransactionSpan {
    /// Span covering sanitize, classify, format and handoff of one transaction.
    ///
    /// `kind` and `status` are filled in as the pipeline progresses.
    pub fn new(transaction_id: &str) -> Span {
        info_span!(
            "transaction_complete",
            transaction_id = %transaction_id,
            kind = tracing::field::Empty,
            events = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}

/// Span covering one probe sampling round.
pub fn probe_tick_span(probes: usize) -> Span {
    info_span!("probe_tick", probes, failed = tracing::field::Empty)
}
