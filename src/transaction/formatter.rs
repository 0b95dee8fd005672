//! Delivery records built from sanitized transactions.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{Classification, Event, Failure, Transaction};
use crate::error::TelemetryError;

/// Serialization-ready record of one completed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub kind: Classification,
    pub action: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Primary span duration in seconds.
    pub duration: Option<f64>,
    pub hostname: String,
    pub failure: Option<FailureRecord>,
    pub failure_time: Option<DateTime<Utc>>,
    pub environment: JsonMap<String, JsonValue>,
    pub session_data: JsonMap<String, JsonValue>,
    pub path: Option<String>,
    pub events: Vec<EventRecord>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: String,
    pub message: String,
    pub causes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub name: String,
    pub payload: JsonMap<String, JsonValue>,
    pub duration: Option<f64>,
}

impl From<&Failure> for FailureRecord {
    fn from(failure: &Failure) -> Self {
        Self {
            kind: failure.kind.clone(),
            message: failure.message.clone(),
            causes: failure.causes.clone(),
        }
    }
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            name: event.name().to_string(),
            payload: event
                .payload()
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
            duration: event.duration(),
        }
    }
}

/// Build the delivery record. Fails fast on an unsanitized transaction.
pub fn to_record(
    transaction: &Transaction,
    slow_threshold: Duration,
) -> Result<TransactionRecord, TelemetryError> {
    if !transaction.is_sanitized() {
        return Err(TelemetryError::NotSanitized {
            id: transaction.id().to_string(),
        });
    }

    Ok(TransactionRecord {
        id: transaction.id().to_string(),
        kind: transaction.classify(slow_threshold),
        action: transaction.action().map(str::to_string),
        created_at: transaction.created_at(),
        duration: transaction.duration(),
        hostname: local_hostname().to_string(),
        failure: transaction.failure().map(FailureRecord::from),
        failure_time: transaction.failure_time(),
        environment: transaction.sanitized_context().clone(),
        session_data: transaction.sanitized_session_data().clone(),
        path: transaction.full_path().map(str::to_string),
        events: transaction.events().iter().map(EventRecord::from).collect(),
        truncated: transaction.is_truncated(),
    })
}

fn local_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string())
    })
}
