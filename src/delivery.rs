//! Bounded handoff of finished records to the external dispatcher.
//!
//! Producers never wait: when the queue is full the new record is dropped
//! (drop-new policy) and counted. Consumers drain with `recv().await`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use crate::transaction::TransactionRecord;

/// Configuration for the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Why a record was not accepted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Delivery queue full ({capacity} records), record dropped")]
    QueueFull { capacity: usize },

    #[error("Delivery queue closed, record dropped")]
    Closed,
}

/// Bounded FIFO between completing contexts and the dispatcher.
pub struct DeliveryQueue {
    records: Mutex<VecDeque<TransactionRecord>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl DeliveryQueue {
    pub fn new(config: DeliveryConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue without blocking. A full or closed queue drops the record.
    pub fn try_enqueue(&self, record: TransactionRecord) -> Result<(), DeliveryError> {
        if self.closed.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(DeliveryError::Closed);
        }

        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            drop(records);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(DeliveryError::QueueFull {
                capacity: self.capacity,
            });
        }
        records.push_back(record);
        drop(records);

        self.notify.notify_one();
        Ok(())
    }

    /// Pop the oldest record without waiting.
    pub fn try_recv(&self) -> Option<TransactionRecord> {
        self.records.lock().pop_front()
    }

    /// Wait for the next record. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<TransactionRecord> {
        loop {
            let notified = self.notify.notified();
            if let Some(record) = self.try_recv() {
                return Some(record);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Take every queued record.
    pub fn drain(&self) -> Vec<TransactionRecord> {
        self.records.lock().drain(..).collect()
    }

    /// Stop accepting records and wake waiting consumers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records dropped since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new(DeliveryConfig::default())
    }
}
