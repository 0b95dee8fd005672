//! Execution-context scoped lookup of live transactions.
//!
//! Each context owns at most one transaction at a time. The map lock is held
//! only around insert, lookup and remove; transaction work happens outside it.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::TelemetryError;
use crate::transaction::{Context, Event, Failure, Transaction};

/// Opaque identifier of an execution context (thread, task, job worker).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey(String);

impl ContextKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for the calling OS thread.
    pub fn current_thread() -> Self {
        Self::from(std::thread::current().id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ContextKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<u64> for ContextKey {
    fn from(key: u64) -> Self {
        Self(key.to_string())
    }
}

impl From<ThreadId> for ContextKey {
    fn from(id: ThreadId) -> Self {
        Self(format!("{:?}", id))
    }
}

/// Generate a transaction id for adapters that have no request id of their own.
pub fn new_transaction_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Shared handle through which the owning context records into its transaction.
///
/// Once the registry completes the transaction the handle is detached and
/// further calls drop their data.
#[derive(Clone)]
pub struct TransactionHandle {
    id: Arc<str>,
    slot: Arc<Mutex<Option<Transaction>>>,
}

impl TransactionHandle {
    fn new(transaction: Transaction) -> Self {
        Self {
            id: Arc::from(transaction.id()),
            slot: Arc::new(Mutex::new(Some(transaction))),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// False once the transaction has been completed.
    pub fn is_live(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn add_event(&self, event: Event) {
        self.with_mut(|t| t.add_event(event));
    }

    pub fn set_primary_span(&self, event: Event) {
        self.with_mut(|t| t.set_primary_span(event));
    }

    pub fn add_failure(&self, failure: Failure) {
        self.with_mut(|t| t.add_failure(failure));
    }

    pub fn add_error<E>(&self, error: &E)
    where
        E: StdError + ?Sized,
    {
        self.add_failure(Failure::from_error(error));
    }

    /// Read the live transaction, or `None` after completion.
    pub fn with<R>(&self, read: impl FnOnce(&Transaction) -> R) -> Option<R> {
        self.slot.lock().as_ref().map(read)
    }

    fn with_mut(&self, write: impl FnOnce(&mut Transaction)) {
        match self.slot.lock().as_mut() {
            Some(transaction) => write(transaction),
            None => debug!(transaction_id = %self.id, "Dropping data for completed transaction"),
        }
    }

    fn take(&self) -> Option<Transaction> {
        self.slot.lock().take()
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    by_context: HashMap<ContextKey, TransactionHandle>,
    /// Live transaction id -> owning context.
    by_id: HashMap<String, ContextKey>,
}

/// Thread-safe registry of in-flight transactions.
#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction for `context`.
    ///
    /// Fails if the context already owns a live transaction, or if `id` is
    /// live under another context.
    pub fn create(
        &self,
        context: impl Into<ContextKey>,
        id: impl Into<String>,
        raw_context: Context,
    ) -> Result<TransactionHandle, TelemetryError> {
        let context = context.into();
        let id = id.into();
        let handle = TransactionHandle::new(Transaction::new(id.clone(), raw_context));

        let mut state = self.state.lock();
        if let Some(existing) = state.by_context.get(&context) {
            return Err(TelemetryError::DuplicateTransaction {
                context: context.to_string(),
                existing: existing.id().to_string(),
            });
        }
        if let Some(owner) = state.by_id.get(&id) {
            return Err(TelemetryError::DuplicateTransactionId {
                id,
                context: owner.to_string(),
            });
        }
        state.by_id.insert(id, context.clone());
        state.by_context.insert(context, handle.clone());
        Ok(handle)
    }

    /// Current transaction of `context`, if any.
    pub fn current(&self, context: impl Into<ContextKey>) -> Option<TransactionHandle> {
        self.state.lock().by_context.get(&context.into()).cloned()
    }

    /// Live transaction by id, whichever context owns it.
    pub fn find(&self, id: &str) -> Option<TransactionHandle> {
        let state = self.state.lock();
        let context = state.by_id.get(id)?;
        state.by_context.get(context).cloned()
    }

    /// Remove the transaction bound to `context` and take ownership of it.
    ///
    /// Removal is atomic, so a transaction is handed off at most once.
    pub fn complete(&self, context: impl Into<ContextKey>) -> Option<Transaction> {
        let handle = {
            let mut state = self.state.lock();
            let handle = state.by_context.remove(&context.into())?;
            state.by_id.remove(handle.id());
            handle
        };
        handle.take()
    }

    pub fn len(&self) -> usize {
        self.state.lock().by_context.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all in-flight transactions.
    pub fn in_flight_ids(&self) -> Vec<String> {
        self.state.lock().by_id.keys().cloned().collect()
    }
}
