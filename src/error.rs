//! Error taxonomy for the agent core.
//!
//! Only contract misuse surfaces as an error. Faults inside sanitizing,
//! formatting or probing degrade to dropped data and never reach the host.

use thiserror::Error;

/// Errors returned to callers that misuse the transaction contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Duplicate transaction: context {context} already has live transaction {existing}")]
    DuplicateTransaction { context: String, existing: String },

    #[error("Duplicate transaction id: {id} is already live under context {context}")]
    DuplicateTransactionId { id: String, context: String },

    #[error("Incomparable transactions: {id} has no primary span")]
    Incomparable { id: String },

    #[error("Transaction {id} formatted before sanitize()")]
    NotSanitized { id: String },
}

impl TelemetryError {
    /// Returns true for errors raised by a second `create` on a busy context or id.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTransaction { .. } | Self::DuplicateTransactionId { .. }
        )
    }
}
