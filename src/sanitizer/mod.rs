//! Reduction of arbitrary host values to a bounded, primitive-only form.
//!
//! The sanitizer never fails. Fields that cannot be described are replaced
//! by [`ERROR_PLACEHOLDER`], fields under a skip key by [`FILTERED_PLACEHOLDER`]
//! and anything nested deeper than the configured cap by
//! [`DEPTH_PLACEHOLDER`].

mod value;

pub use value::{Opaque, Payload, Value};

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use value::float_to_json;

/// Replacement for values stored under a skip key.
pub const FILTERED_PLACEHOLDER: &str = "[FILTERED]";
/// Replacement for structure nested past the depth cap.
pub const DEPTH_PLACEHOLDER: &str = "[MAX DEPTH REACHED]";
/// Replacement for a field whose description failed.
pub const ERROR_PLACEHOLDER: &str = "[SANITIZE ERROR]";

/// Per-field failure while describing a host object.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("Object {type_name} cannot be represented: {reason}")]
    Unrepresentable { type_name: String, reason: String },

    #[error("Object {type_name} panicked while being described")]
    Panicked { type_name: String },
}

/// Sanitizer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizerConfig {
    /// Nesting levels kept before collapsing to a placeholder.
    pub max_depth: usize,
    /// Keys whose values are redacted, matched case-insensitively.
    pub skip_keys: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            skip_keys: default_skip_keys(),
        }
    }
}

pub(crate) fn default_skip_keys() -> Vec<String> {
    [
        "password",
        "password_confirmation",
        "secret",
        "token",
        "api_key",
        "authorization",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

/// Stateless converter from [`Value`] to JSON primitives.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    max_depth: usize,
    skip_keys: HashSet<String>,
}

impl Sanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        Self {
            max_depth: config.max_depth.max(1),
            skip_keys: config
                .skip_keys
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// True when `key` is redacted wherever it appears.
    pub fn is_skipped(&self, key: &str) -> bool {
        !self.skip_keys.is_empty() && self.skip_keys.contains(&key.to_lowercase())
    }

    /// Convert a value into its primitive representation.
    pub fn sanitize(&self, value: &Value) -> JsonValue {
        self.sanitize_at(value, 0)
    }

    /// Sanitize every entry of a mapping, keeping the key set.
    pub fn sanitize_map(&self, map: &Payload) -> JsonMap<String, JsonValue> {
        map.iter()
            .map(|(key, value)| (key.clone(), self.sanitize_entry(key, value, 1)))
            .collect()
    }

    /// Rewrite a payload in place so that only primitive values remain.
    ///
    /// Entries are replaced one at a time so the map allocation is reused.
    pub fn sanitize_in_place(&self, payload: &mut Payload) {
        for (key, value) in payload.iter_mut() {
            let clean = self.sanitize_entry(key, value, 1);
            *value = Value::from(clean);
        }
    }

    fn sanitize_entry(&self, key: &str, value: &Value, depth: usize) -> JsonValue {
        if self.is_skipped(key) {
            return JsonValue::String(FILTERED_PLACEHOLDER.to_string());
        }
        self.sanitize_at(value, depth)
    }

    fn sanitize_at(&self, value: &Value, depth: usize) -> JsonValue {
        match value {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => float_to_json(*f),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Opaque(object) => describe(object.as_ref()),
            Value::Array(_) | Value::Map(_) | Value::Shared(_) if depth >= self.max_depth => {
                JsonValue::String(DEPTH_PLACEHOLDER.to_string())
            }
            Value::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| self.sanitize_at(item, depth + 1))
                    .collect(),
            ),
            Value::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(key, child)| (key.clone(), self.sanitize_entry(key, child, depth + 1)))
                    .collect(),
            ),
            Value::Shared(cell) => {
                // Recursive read: a cycle re-enters the same lock on this thread.
                let inner = cell.read_recursive();
                self.sanitize_at(&inner, depth + 1)
            }
        }
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(SanitizerConfig::default())
    }
}

fn describe(object: &dyn Opaque) -> JsonValue {
    let outcome = catch_unwind(AssertUnwindSafe(|| object.repr()));
    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(SanitizeError::Panicked {
            type_name: object.type_name().to_string(),
        }),
    };
    match result {
        Ok(repr) => JsonValue::String(repr),
        Err(e) => {
            debug!(error = %e, "Field replaced during sanitize");
            JsonValue::String(ERROR_PLACEHOLDER.to_string())
        }
    }
}
