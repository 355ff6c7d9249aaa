//! Acknowledgment Registry
//!
//! Transient master-side records of in-flight writes awaiting their write
//! concern. One record per submitted entry, destroyed when the submit call
//! returns. Acks are keyed `(entry_id, secondary_id)` so duplicate acks
//! from the same secondary never double-count.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};

use crate::log::EntryId;

/// Per-write acknowledgment state
pub struct AckState {
    required: usize,
    /// Secondaries that have acked this entry; the master counts itself
    /// separately (see `ack_count`)
    acks: Mutex<HashSet<String>>,
    notify: Notify,
}

impl AckState {
    fn new(required: usize) -> Self {
        Self {
            required,
            acks: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        }
    }

    /// Acks achieved so far, including the master's own local append
    pub async fn ack_count(&self) -> usize {
        1 + self.acks.lock().await.len()
    }

    /// Write concern this record is waiting for
    pub fn required(&self) -> usize {
        self.required
    }

    /// Future resolving on the next ack for this entry. Pin it and call
    /// `enable` before reading `ack_count`, or an ack between the read
    /// and the await goes unnoticed.
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    async fn record(&self, secondary_id: &str) -> bool {
        let inserted = self.acks.lock().await.insert(secondary_id.to_string());
        if inserted {
            self.notify.notify_waiters();
        }
        inserted
    }
}

/// Registry of in-flight writes awaiting acknowledgment
#[derive(Default)]
pub struct AckRegistry {
    writes: RwLock<HashMap<EntryId, Arc<AckState>>>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a write awaiting `required` total acks
    pub async fn register(&self, entry_id: EntryId, required: usize) -> Arc<AckState> {
        let state = Arc::new(AckState::new(required));
        self.writes.write().await.insert(entry_id, state.clone());
        state
    }

    /// Record an ack for a single entry. Returns true if this was a new
    /// `(entry_id, secondary_id)` pair; false for duplicates or for
    /// entries no longer waiting.
    pub async fn record(&self, entry_id: EntryId, secondary_id: &str) -> bool {
        let state = self.writes.read().await.get(&entry_id).cloned();
        match state {
            Some(state) => state.record(secondary_id).await,
            None => false,
        }
    }

    /// Record a cumulative ack: the secondary holds everything through
    /// `cursor`, so every waiting write with id <= cursor is credited.
    pub async fn record_through(&self, secondary_id: &str, cursor: EntryId) {
        let states: Vec<Arc<AckState>> = {
            let writes = self.writes.read().await;
            writes
                .iter()
                .filter(|(id, _)| **id <= cursor)
                .map(|(_, s)| s.clone())
                .collect()
        };

        for state in states {
            state.record(secondary_id).await;
        }
    }

    /// Drop the record for a completed or abandoned write
    pub async fn remove(&self, entry_id: EntryId) {
        self.writes.write().await.remove(&entry_id);
    }

    /// Number of writes still waiting
    pub async fn in_flight(&self) -> usize {
        self.writes.read().await.len()
    }
}
