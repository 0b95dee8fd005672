//! Transaction classification.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Transaction;

/// Category of a completed transaction.
///
/// Ordered by reporting priority: a failure always wins over slowness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Failed,
    Slow,
    Normal,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Slow => "slow",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a transaction against the slow threshold.
pub fn classify(transaction: &Transaction, slow_threshold: Duration) -> Classification {
    if transaction.is_failed() {
        Classification::Failed
    } else if transaction.is_slow(slow_threshold) {
        Classification::Slow
    } else {
        Classification::Normal
    }
}
