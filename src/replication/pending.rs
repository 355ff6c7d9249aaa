//! Pending/Retry Queue
//!
//! Per-secondary outbox of entries not yet acknowledged by that secondary.
//! Every local append lands in every queue; an entry leaves a queue only on
//! that secondary's acknowledgment, never on "attempted". A background
//! worker redelivers the head of each non-empty queue with capped
//! exponential backoff, so delivery to a given secondary stays in
//! id-ascending order and never skips past an unacknowledged entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tokio::time::interval;

use crate::log::{EntryId, MessageEntry};

/// An entry awaiting a specific secondary's acknowledgment
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub entry: MessageEntry,
    pub attempts: u32,
    pub last_attempt: Option<Instant>,
}

/// Ordered outbox for one secondary
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: BTreeMap<EntryId, PendingEntry>,
}

impl PendingQueue {
    fn enqueue(&mut self, entry: MessageEntry) {
        self.entries.entry(entry.id).or_insert(PendingEntry {
            entry,
            attempts: 0,
            last_attempt: None,
        });
    }

    fn ack(&mut self, id: EntryId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Remove everything the secondary already holds (id <= cursor). The
    /// cursor is client-supplied, so `u64::MAX` must drain the whole queue
    /// rather than overflow.
    fn ack_through(&mut self, cursor: EntryId) -> usize {
        let keep = match cursor.checked_add(1) {
            Some(next) => self.entries.split_off(&next),
            None => BTreeMap::new(),
        };
        let drained = self.entries.len();
        self.entries = keep;
        drained
    }

    /// Head entry if its backoff window has elapsed
    fn head_due(&self, base: Duration, cap: Duration) -> Option<MessageEntry> {
        let (_, pending) = self.entries.iter().next()?;
        match pending.last_attempt {
            None => Some(pending.entry.clone()),
            Some(at) if at.elapsed() >= backoff_for(pending.attempts, base, cap) => {
                Some(pending.entry.clone())
            }
            Some(_) => None,
        }
    }

    fn record_failure(&mut self, id: EntryId) {
        if let Some(pending) = self.entries.get_mut(&id) {
            pending.attempts += 1;
            pending.last_attempt = Some(Instant::now());
        }
    }

    fn depth(&self) -> usize {
        self.entries.len()
    }

    fn head_id(&self) -> Option<EntryId> {
        self.entries.keys().next().copied()
    }
}

/// Backoff before the next attempt, with a little jitter to keep retries
/// from synchronizing across secondaries
fn backoff_for(attempts: u32, base: Duration, cap: Duration) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }
    let exp = base.saturating_mul(2u32.saturating_pow(attempts.saturating_sub(1).min(10)));
    let bounded = exp.min(cap);
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64 / 4);
    bounded + Duration::from_millis(jitter_ms)
}

/// Replication lag summary for one secondary
#[derive(Debug, Clone, serde::Serialize)]
pub struct PendingLag {
    pub secondary_id: String,
    pub depth: usize,
    pub next_pending_id: Option<EntryId>,
}

/// All per-secondary outboxes. The secondary set is fixed at startup.
pub struct PendingSet {
    queues: HashMap<String, Mutex<PendingQueue>>,
}

impl PendingSet {
    pub fn new(secondary_ids: impl IntoIterator<Item = String>) -> Self {
        let queues = secondary_ids
            .into_iter()
            .map(|id| (id, Mutex::new(PendingQueue::default())))
            .collect();
        Self { queues }
    }

    /// Queue a freshly appended entry for every secondary
    pub async fn enqueue_all(&self, entry: &MessageEntry) {
        for queue in self.queues.values() {
            queue.lock().await.enqueue(entry.clone());
        }
    }

    /// Remove an acked entry from one secondary's queue
    pub async fn ack(&self, secondary_id: &str, id: EntryId) -> bool {
        match self.queues.get(secondary_id) {
            Some(queue) => queue.lock().await.ack(id),
            None => false,
        }
    }

    /// Drain everything through the secondary's reported cursor
    pub async fn ack_through(&self, secondary_id: &str, cursor: EntryId) -> usize {
        match self.queues.get(secondary_id) {
            Some(queue) => queue.lock().await.ack_through(cursor),
            None => 0,
        }
    }

    /// Head of a secondary's queue, if due for redelivery
    pub async fn due_head(
        &self,
        secondary_id: &str,
        base: Duration,
        cap: Duration,
    ) -> Option<MessageEntry> {
        self.queues
            .get(secondary_id)?
            .lock()
            .await
            .head_due(base, cap)
    }

    /// Note a failed delivery attempt (pushes the backoff window out)
    pub async fn record_failure(&self, secondary_id: &str, id: EntryId) {
        if let Some(queue) = self.queues.get(secondary_id) {
            queue.lock().await.record_failure(id);
        }
    }

    /// Outstanding entry count for one secondary
    pub async fn depth(&self, secondary_id: &str) -> usize {
        match self.queues.get(secondary_id) {
            Some(queue) => queue.lock().await.depth(),
            None => 0,
        }
    }

    /// Lag summary across all secondaries
    pub async fn lag_report(&self) -> Vec<PendingLag> {
        let mut report = Vec::with_capacity(self.queues.len());
        for (id, queue) in &self.queues {
            let queue = queue.lock().await;
            report.push(PendingLag {
                secondary_id: id.clone(),
                depth: queue.depth(),
                next_pending_id: queue.head_id(),
            });
        }
        report.sort_by(|a, b| a.secondary_id.cmp(&b.secondary_id));
        report
    }
}

/// Background redelivery loop driving the pending queues
pub struct RetryWorker {
    master: Arc<super::master::MasterNode>,
    tick: Duration,
    shutdown: RwLock<bool>,
}

impl RetryWorker {
    pub fn new(master: Arc<super::master::MasterNode>, tick: Duration) -> Self {
        Self {
            master,
            tick,
            shutdown: RwLock::new(false),
        }
    }

    /// Run until stopped. Each tick redelivers at most the head of each
    /// non-empty queue, all secondaries in parallel.
    pub async fn run(&self) {
        let mut ticker = interval(self.tick);
        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }
            self.master.redeliver_pending().await;
        }
        tracing::info!("Retry worker stopped");
    }

    /// Stop the worker
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: EntryId) -> MessageEntry {
        MessageEntry::new(id, format!("msg-{id}"))
    }

    #[tokio::test]
    async fn test_enqueue_all_fans_out() {
        let set = PendingSet::new(["secondary1".to_string(), "secondary2".to_string()]);
        set.enqueue_all(&entry(1)).await;
        set.enqueue_all(&entry(2)).await;

        assert_eq!(set.depth("secondary1").await, 2);
        assert_eq!(set.depth("secondary2").await, 2);
        assert_eq!(set.depth("unknown").await, 0);
    }

    #[tokio::test]
    async fn test_ack_removes_only_that_secondary() {
        let set = PendingSet::new(["secondary1".to_string(), "secondary2".to_string()]);
        set.enqueue_all(&entry(1)).await;

        assert!(set.ack("secondary1", 1).await);
        assert!(!set.ack("secondary1", 1).await);
        assert_eq!(set.depth("secondary1").await, 0);
        assert_eq!(set.depth("secondary2").await, 1);
    }

    #[tokio::test]
    async fn test_ack_through_drains_prefix() {
        let set = PendingSet::new(["secondary1".to_string()]);
        for id in 1..=5 {
            set.enqueue_all(&entry(id)).await;
        }

        assert_eq!(set.ack_through("secondary1", 3).await, 3);
        assert_eq!(set.depth("secondary1").await, 2);

        let report = set.lag_report().await;
        assert_eq!(report[0].next_pending_id, Some(4));
    }

    #[tokio::test]
    async fn test_ack_through_max_cursor_drains_everything() {
        let set = PendingSet::new(["secondary1".to_string()]);
        for id in 1..=3 {
            set.enqueue_all(&entry(id)).await;
        }

        assert_eq!(set.ack_through("secondary1", u64::MAX).await, 3);
        assert_eq!(set.depth("secondary1").await, 0);
    }

    #[tokio::test]
    async fn test_head_only_redelivery_order() {
        let base = Duration::from_millis(10);
        let cap = Duration::from_millis(100);
        let set = PendingSet::new(["secondary1".to_string()]);
        set.enqueue_all(&entry(1)).await;
        set.enqueue_all(&entry(2)).await;

        // Head is entry 1; entry 2 is never offered while 1 is queued
        let head = set.due_head("secondary1", base, cap).await.unwrap();
        assert_eq!(head.id, 1);

        set.record_failure("secondary1", 1).await;
        // Backoff window holds entry 1 back but does not expose entry 2
        assert!(set.due_head("secondary1", base, cap).await.is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let head = set.due_head("secondary1", base, cap).await.unwrap();
        assert_eq!(head.id, 1);

        set.ack("secondary1", 1).await;
        let head = set.due_head("secondary1", base, cap).await.unwrap();
        assert_eq!(head.id, 2);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(2);

        assert_eq!(backoff_for(0, base, cap), Duration::ZERO);
        let first = backoff_for(1, base, cap);
        let third = backoff_for(3, base, cap);
        assert!(first >= base);
        assert!(third >= Duration::from_millis(400));
        // Far past the cap, jitter aside
        let huge = backoff_for(30, base, cap);
        assert!(huge <= cap + Duration::from_millis(25));
    }
}
