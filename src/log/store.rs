//! Log Store
//!
//! In-memory ordered log keyed by entry id. The master appends at the
//! tail; secondaries insert wherever delivery happens to land, so the
//! store accepts out-of-order arrivals and tracks the highest id that is
//! contiguous from 1 (`last_applied_id`).

use std::collections::BTreeMap;
use std::ops::Bound;

use super::entry::{EntryId, MessageEntry};

/// Outcome of inserting an entry into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Entry was new and is now stored
    Applied,
    /// Entry id was already present; store unchanged
    Duplicate,
}

/// Ordered, deduplicating log store
#[derive(Debug, Default)]
pub struct LogStore {
    entries: BTreeMap<EntryId, MessageEntry>,
    /// Highest id such that every id in 1..=last_applied is present
    last_applied: EntryId,
}

impl LogStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry at the tail, assigning the next id.
    ///
    /// Master-side only. Callers serialize appends by holding the store's
    /// write lock, which makes id allocation exclusive.
    pub fn append(&mut self, text: impl Into<String>) -> MessageEntry {
        let id = self.highest_id() + 1;
        let entry = MessageEntry::new(id, text);
        self.entries.insert(id, entry.clone());
        // Tail appends on the master never leave a gap
        if id == self.last_applied + 1 {
            self.last_applied = id;
        }
        entry
    }

    /// Insert an entry by id, tolerating duplicates and gaps.
    ///
    /// Secondary-side apply path. A later-arriving id that leaves a gap is
    /// stored but does not advance `last_applied_id` until the gap fills.
    pub fn insert(&mut self, entry: MessageEntry) -> ApplyOutcome {
        if self.entries.contains_key(&entry.id) {
            return ApplyOutcome::Duplicate;
        }

        self.entries.insert(entry.id, entry);
        self.advance_last_applied();
        ApplyOutcome::Applied
    }

    /// Recompute the contiguous prefix bound after an insert
    fn advance_last_applied(&mut self) {
        while let Some(next) = self.last_applied.checked_add(1) {
            if !self.entries.contains_key(&next) {
                break;
            }
            self.last_applied = next;
        }
    }

    /// Highest id contiguously present from 1
    pub fn last_applied_id(&self) -> EntryId {
        self.last_applied
    }

    /// Highest id present at all (may exceed `last_applied_id` when the
    /// log has a gap)
    pub fn highest_id(&self) -> EntryId {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    /// Whether the log currently has a hole below its highest id
    pub fn has_gap(&self) -> bool {
        self.last_applied < self.highest_id()
    }

    /// Whether an id is present
    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ordered snapshot of the full log
    pub fn snapshot(&self) -> Vec<MessageEntry> {
        self.entries.values().cloned().collect()
    }

    /// Ordered entries with id > cursor. The cursor comes off the wire,
    /// so any u64 must be safe, including `u64::MAX`.
    pub fn entries_after(&self, cursor: EntryId) -> Vec<MessageEntry> {
        self.entries
            .range((Bound::Excluded(cursor), Bound::Unbounded))
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: EntryId) -> MessageEntry {
        MessageEntry::new(id, format!("msg-{id}"))
    }

    #[test]
    fn test_append_assigns_sequential_ids() {
        let mut store = LogStore::new();
        assert_eq!(store.append("a").id, 1);
        assert_eq!(store.append("b").id, 2);
        assert_eq!(store.append("c").id, 3);
        assert_eq!(store.last_applied_id(), 3);
        assert!(!store.has_gap());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut store = LogStore::new();
        assert_eq!(store.insert(entry(1)), ApplyOutcome::Applied);
        assert_eq!(store.insert(entry(1)), ApplyOutcome::Duplicate);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_gap_holds_back_last_applied() {
        let mut store = LogStore::new();
        store.insert(entry(1));
        store.insert(entry(3));
        assert_eq!(store.last_applied_id(), 1);
        assert_eq!(store.highest_id(), 3);
        assert!(store.has_gap());

        // Filling the gap advances past both entries
        store.insert(entry(2));
        assert_eq!(store.last_applied_id(), 3);
        assert!(!store.has_gap());
    }

    #[test]
    fn test_scrambled_delivery_converges() {
        let sorted: Vec<_> = (1..=6).map(entry).collect();

        let mut scrambled = LogStore::new();
        for id in [4u64, 1, 6, 3, 2, 5] {
            scrambled.insert(entry(id));
        }

        let mut in_order = LogStore::new();
        for e in &sorted {
            in_order.insert(e.clone());
        }

        let a: Vec<_> = scrambled.snapshot().iter().map(|e| e.id).collect();
        let b: Vec<_> = in_order.snapshot().iter().map(|e| e.id).collect();
        assert_eq!(a, b);
        assert_eq!(scrambled.last_applied_id(), 6);
    }

    #[test]
    fn test_entries_after_cursor() {
        let mut store = LogStore::new();
        for _ in 0..5 {
            store.append("x");
        }

        let tail = store.entries_after(2);
        let ids: Vec<_> = tail.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert!(store.entries_after(5).is_empty());
        assert_eq!(store.entries_after(0).len(), 5);
    }

    #[test]
    fn test_entries_after_max_cursor_is_empty() {
        let mut store = LogStore::new();
        store.append("x");
        // Clients choose the cursor, so the extreme value must not panic
        assert!(store.entries_after(u64::MAX).is_empty());

        store.insert(entry(u64::MAX));
        assert!(store.entries_after(u64::MAX).is_empty());
    }
}
