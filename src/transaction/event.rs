//! Instrumented operations recorded on a transaction.

use crate::sanitizer::{Payload, Value};

/// One instrumented operation: name, payload and optional duration in seconds.
///
/// Events are immutable once built; only the owning transaction rewrites the
/// payload when it sanitizes.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    payload: Payload,
    duration: Option<f64>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            payload,
            duration: None,
        }
    }

    /// Build an event from key/value pairs.
    pub fn with_fields<K, V, I>(name: impl Into<String>, fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let payload = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(name, payload)
    }

    /// Set the duration in seconds.
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }
}
