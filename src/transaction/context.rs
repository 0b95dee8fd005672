//! Inbound request context: the allow-list and the request accessor.

use crate::sanitizer::{Payload, Value};

/// Raw request/job context handed in by the adapter.
pub type Context = Payload;

/// Context keys copied into the sanitized environment. Everything else is dropped.
pub const ALLOWED_CONTEXT_KEYS: &[&str] = &[
    "CONTENT_LENGTH",
    "AUTH_TYPE",
    "GATEWAY_INTERFACE",
    "PATH_TRANSLATED",
    "REMOTE_HOST",
    "REMOTE_IDENT",
    "REMOTE_USER",
    "REMOTE_ADDR",
    "REQUEST_METHOD",
    "SERVER_NAME",
    "SERVER_PORT",
    "SERVER_PROTOCOL",
    "HTTP_X_REQUEST_START",
    "HTTP_X_MIDDLEWARE_START",
    "HTTP_X_QUEUE_START",
    "HTTP_X_QUEUE_TIME",
    "HTTP_X_HEROKU_QUEUE_WAIT_TIME",
    "HTTP_X_APPLICATION_START",
    "HTTP_ACCEPT",
    "HTTP_ACCEPT_CHARSET",
    "HTTP_ACCEPT_ENCODING",
    "HTTP_ACCEPT_LANGUAGE",
    "HTTP_CACHE_CONTROL",
    "HTTP_CONNECTION",
    "HTTP_USER_AGENT",
    "HTTP_FROM",
    "HTTP_NEGOTIATE",
    "HTTP_PRAGMA",
    "HTTP_REFERER",
];

/// Exact, case-sensitive allow-list check.
pub fn is_allowed_context_key(key: &str) -> bool {
    ALLOWED_CONTEXT_KEYS.contains(&key)
}

/// Reads request-level details out of a raw context.
///
/// Adapters supply an implementation that understands their framework's
/// request object; the core only calls it during sanitize.
pub trait ContextAccessor: Send + Sync {
    /// Session mapping for the request, if any.
    fn session(&self, context: &Context) -> Option<Value>;

    /// Path plus query string of the request, if any.
    fn full_path(&self, context: &Context) -> Option<String>;
}

/// Accessor for CGI-style contexts.
///
/// Session data lives under [`CgiContextAccessor::SESSION_KEY`]; the path is
/// `PATH_INFO` joined with `QUERY_STRING`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CgiContextAccessor;

impl CgiContextAccessor {
    pub const SESSION_KEY: &'static str = "session";
}

impl ContextAccessor for CgiContextAccessor {
    fn session(&self, context: &Context) -> Option<Value> {
        context.get(Self::SESSION_KEY).cloned()
    }

    fn full_path(&self, context: &Context) -> Option<String> {
        let path = context.get("PATH_INFO").and_then(Value::as_str)?;
        match context.get("QUERY_STRING").and_then(Value::as_str) {
            Some(query) if !query.is_empty() => Some(format!("{}?{}", path, query)),
            _ => Some(path.to_string()),
        }
    }
}
