//! Host values as seen by the agent before sanitization.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use super::SanitizeError;

/// Key-ordered mapping carried by events and contexts.
pub type Payload = BTreeMap<String, Value>;

/// A host object that can only be described, not traversed.
pub trait Opaque: fmt::Debug + Send + Sync {
    /// Name of the host type, used in diagnostics.
    fn type_name(&self) -> &str;

    /// String representation of the object.
    fn repr(&self) -> Result<String, SanitizeError>;
}

/// Arbitrary nested value handed to the agent by an adapter.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(Payload),
    Opaque(Arc<dyn Opaque>),
    /// Aliased node; the only way to build a cyclic value.
    Shared(Arc<RwLock<Value>>),
}

impl Value {
    /// Build a map value from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Wrap a host object.
    pub fn opaque<T: Opaque + 'static>(object: T) -> Self {
        Value::Opaque(Arc::new(object))
    }

    /// Wrap any `Display` type as an opaque object.
    pub fn display<T>(object: T) -> Self
    where
        T: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Value::opaque(DisplayObject(object))
    }

    /// Create a shared node. The returned cell can be used to close a cycle.
    pub fn shared(inner: Value) -> (Self, Arc<RwLock<Value>>) {
        let cell = Arc::new(RwLock::new(inner));
        (Value::Shared(Arc::clone(&cell)), cell)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Payload> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Scalar rendered as a label (strings, integers, booleans).
    pub fn as_label(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// True when the value holds no opaque or shared node at any depth.
    pub fn is_primitive(&self) -> bool {
        match self {
            Value::Opaque(_) | Value::Shared(_) => false,
            Value::Array(items) => items.iter().all(Value::is_primitive),
            Value::Map(map) => map.values().all(Value::is_primitive),
            _ => true,
        }
    }

    /// Lossless conversion for values already reduced to primitives.
    ///
    /// Opaque and shared nodes are never expanded here; they render as a
    /// fixed marker so this stays bounded on unsanitized input.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => float_to_json(*f),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => JsonValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Opaque(_) | Value::Shared(_) => JsonValue::String(UNSANITIZED_MARKER.to_string()),
        }
    }
}

const UNSANITIZED_MARKER: &str = "[UNSANITIZED]";

pub(crate) fn float_to_json(f: f64) -> JsonValue {
    serde_json::Number::from_f64(f)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(f.to_string()))
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Value::Opaque(obj) => f.debug_tuple("Opaque").field(&obj.type_name()).finish(),
            // Never follow the pointer: it may close a cycle.
            Value::Shared(_) => f.write_str("Shared(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            (Value::Shared(a), Value::Shared(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Payload> for Value {
    fn from(map: Payload) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[derive(Debug)]
struct DisplayObject<T>(T);

impl<T> Opaque for DisplayObject<T>
where
    T: fmt::Display + fmt::Debug + Send + Sync,
{
    fn type_name(&self) -> &str {
        std::any::type_name::<T>()
    }

    fn repr(&self) -> Result<String, SanitizeError> {
        Ok(self.0.to_string())
    }
}
