//! In-Flight Transaction Tracking
//!
//! Bounded, ordered record of submitted signatures and their lifecycle
//! status. Newest entries sit at the front; when the bound is reached the
//! oldest entry is evicted regardless of its status.

use std::collections::VecDeque;

use tracing::debug;

use crate::types::{TrackedTransaction, TxStatus};

/// Default bound on the tracked-transaction list
pub const DEFAULT_TRANSACTION_CAPACITY: usize = 20;

/// Bounded transaction record keyed by signature
#[derive(Debug, Clone)]
pub struct TransactionTracker {
    entries: VecDeque<TrackedTransaction>,
    capacity: usize,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSACTION_CAPACITY)
    }
}

impl TransactionTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert an entry at the front, evicting from the tail past capacity
    ///
    /// Re-tracking a known signature updates the existing entry in place,
    /// preserving its position; no duplicate keys ever exist. Returns whether
    /// a new entry was inserted.
    pub fn track(&mut self, entry: TrackedTransaction) -> bool {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.signature == entry.signature)
        {
            existing.status = entry.status;
            existing.error = entry.error;
            if entry.metadata.is_some() {
                existing.metadata = entry.metadata;
            }
            return false;
        }
        self.entries.push_front(entry);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                debug!(signature = %evicted.signature, "evicted tracked transaction");
            }
        }
        true
    }

    /// Update a tracked signature; unknown signatures are a no-op
    pub fn update_status(
        &mut self,
        signature: &str,
        status: TxStatus,
        error: Option<String>,
    ) -> bool {
        match self.entries.iter_mut().find(|e| e.signature == signature) {
            Some(entry) => {
                entry.status = status;
                entry.error = error;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, signature: &str) -> Option<&TrackedTransaction> {
        self.entries.iter().find(|e| e.signature == signature)
    }

    /// Newest-first snapshot of all entries
    pub fn snapshot(&self) -> Vec<TrackedTransaction> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
