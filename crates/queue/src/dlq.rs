//! Dead-letter retention for items that exhausted their retries.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use pulsebridge_core::QueueItem;
use serde::{Deserialize, Serialize};

/// A failed item together with the error that killed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub item: QueueItem,
    /// Message of the last execution error.
    pub error: String,
    /// Total execution attempts, including the first.
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// In-memory store of permanently failed items.
///
/// Entries stay here until they are drained or taken back out via
/// [`DeadLetterQueue::take`] for a manual requeue.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: QueueItem, error: String, attempts: u32) {
        let entry = DeadLetterEntry {
            item,
            error,
            attempts,
            failed_at: Utc::now(),
        };
        let mut entries = self.entries.lock().expect("dlq mutex poisoned");
        entries.push(entry);
    }

    /// Removes and returns the entry whose item has the given id.
    pub fn take(&self, item_id: &str) -> Option<DeadLetterEntry> {
        let mut entries = self.entries.lock().expect("dlq mutex poisoned");
        let pos = entries.iter().position(|e| e.item.id == item_id)?;
        Some(entries.remove(pos))
    }

    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().expect("dlq mutex poisoned").clone()
    }

    pub fn drain(&self) -> Vec<DeadLetterEntry> {
        let mut entries = self.entries.lock().expect("dlq mutex poisoned");
        std::mem::take(&mut *entries)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("dlq mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
