//! Master Node Implementation
//!
//! Accepts new messages, assigns ids, appends locally, fans out to
//! secondaries, and gates the caller's response on the requested write
//! concern. Replication to each secondary runs as its own task and
//! continues past the client response; the pending/retry queue owns
//! redelivery for anything a secondary has not acknowledged.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::SecondaryConfig;
use crate::error::{Error, Result};
use crate::log::{EntryId, LogStore, MessageEntry};
use crate::replication::acks::AckRegistry;
use crate::replication::pending::{PendingLag, PendingSet};
use crate::replication::transport::ReplicationTransport;
use crate::replication::ReplicationConfig;

/// Client-visible outcome of a submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    /// Write concern satisfied within the wait bound
    Committed,
    /// Wait bound elapsed first; entry is durable on the master and
    /// replication continues in the background
    Degraded,
}

/// Result of a successful submit
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub entry: MessageEntry,
    pub acks_achieved: usize,
    pub required: usize,
    pub status: SubmitStatus,
}

/// Master node state
pub struct MasterNode {
    node_id: String,
    log: Arc<RwLock<LogStore>>,
    secondaries: Vec<SecondaryConfig>,
    pending: Arc<PendingSet>,
    acks: Arc<AckRegistry>,
    transport: Arc<dyn ReplicationTransport>,
    config: ReplicationConfig,
}

impl MasterNode {
    /// Create a new master node
    pub fn new(
        node_id: String,
        secondaries: Vec<SecondaryConfig>,
        transport: Arc<dyn ReplicationTransport>,
        config: ReplicationConfig,
    ) -> Self {
        let pending = Arc::new(PendingSet::new(
            secondaries.iter().map(|s| s.id.clone()),
        ));

        Self {
            node_id,
            log: Arc::new(RwLock::new(LogStore::new())),
            secondaries,
            pending,
            acks: Arc::new(AckRegistry::new()),
            transport,
            config,
        }
    }

    /// Accept a message with the given write concern.
    ///
    /// Id allocation and the local append happen under the log's write
    /// lock, so concurrent submits never share an id. The local append is
    /// ack #1; `w - 1` further distinct secondary acks satisfy the quorum.
    pub async fn submit(&self, text: String, w: usize) -> Result<SubmitReceipt> {
        let max = self.secondaries.len() + 1;
        if w < 1 || w > max {
            return Err(Error::InvalidWriteConcern { w, max });
        }

        let entry = self.log.write().await.append(text);
        tracing::info!("Appended entry {} (w={})", entry.id, w);

        let state = if w >= 2 {
            Some(self.acks.register(entry.id, w).await)
        } else {
            None
        };

        // Every append enters every secondary's outbox; only an ack from
        // that secondary removes it.
        self.pending.enqueue_all(&entry).await;

        // Live fan-out, one task per secondary, detached from the client
        // response.
        for secondary in &self.secondaries {
            let transport = Arc::clone(&self.transport);
            let pending = Arc::clone(&self.pending);
            let acks = Arc::clone(&self.acks);
            let secondary = secondary.clone();
            let entry = entry.clone();
            tokio::spawn(async move {
                attempt_delivery(&*transport, &pending, &acks, &secondary, &entry, false).await;
            });
        }

        let Some(state) = state else {
            return Ok(SubmitReceipt {
                entry,
                acks_achieved: 1,
                required: w,
                status: SubmitStatus::Committed,
            });
        };

        let deadline = Instant::now() + self.config.write_timeout;
        let (acks_achieved, status) = loop {
            let notified = state.notified();
            tokio::pin!(notified);
            // Register the waiter before the count check; an ack landing
            // in between then wakes the await instead of being missed
            // until the deadline.
            notified.as_mut().enable();
            let achieved = state.ack_count().await;
            if achieved >= w {
                break (achieved, SubmitStatus::Committed);
            }
            match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => {
                    let _ = tokio::time::timeout(remaining, notified).await;
                }
                None => break (achieved, SubmitStatus::Degraded),
            }
        };
        self.acks.remove(entry.id).await;

        if status == SubmitStatus::Degraded {
            tracing::warn!(
                "Entry {} acked by {}/{} before the wait bound; replication continues",
                entry.id,
                acks_achieved,
                w
            );
        }

        Ok(SubmitReceipt {
            entry,
            acks_achieved,
            required: w,
            status,
        })
    }

    /// Record one secondary's acknowledgment of one entry. Idempotent.
    pub async fn record_ack(&self, secondary_id: &str, entry_id: EntryId) {
        self.pending.ack(secondary_id, entry_id).await;
        if self.acks.record(entry_id, secondary_id).await {
            tracing::debug!("Ack for entry {} from {}", entry_id, secondary_id);
        }
    }

    /// Record a cumulative acknowledgment: the secondary holds everything
    /// through `cursor`. Drains its outbox and credits quorum waits.
    pub async fn record_ack_through(&self, secondary_id: &str, cursor: EntryId) {
        let drained = self.pending.ack_through(secondary_id, cursor).await;
        if drained > 0 {
            tracing::info!(
                "Drained {} pending entries for {} (caught up through {})",
                drained,
                secondary_id,
                cursor
            );
        }
        self.acks.record_through(secondary_id, cursor).await;
    }

    /// Serve a catch-up request: all entries with id > cursor, read as a
    /// consistent snapshot. A known requester's cursor also drains its
    /// pending queue, since those entries are already satisfied.
    pub async fn entries_since(
        &self,
        cursor: EntryId,
        secondary_id: Option<&str>,
    ) -> Vec<MessageEntry> {
        if let Some(id) = secondary_id {
            // Only configured secondaries may move ack state
            if self.secondaries.iter().any(|s| s.id == id) {
                self.record_ack_through(id, cursor).await;
            }
        }
        self.log.read().await.entries_after(cursor)
    }

    /// Redeliver the due head of each secondary's outbox, all secondaries
    /// in parallel. Called from the retry worker.
    pub async fn redeliver_pending(&self) {
        let base = self.config.retry_backoff;
        let cap = self.config.retry_backoff_cap;

        let attempts = self.secondaries.iter().map(|secondary| async move {
            let Some(entry) = self.pending.due_head(&secondary.id, base, cap).await else {
                return;
            };
            attempt_delivery(
                &*self.transport,
                &self.pending,
                &self.acks,
                secondary,
                &entry,
                true,
            )
            .await;
        });
        futures::future::join_all(attempts).await;
    }

    /// Ordered snapshot of the full log
    pub async fn snapshot(&self) -> Vec<MessageEntry> {
        self.log.read().await.snapshot()
    }

    /// Highest assigned entry id
    pub async fn highest_id(&self) -> EntryId {
        self.log.read().await.highest_id()
    }

    /// Per-secondary outstanding replication summary
    pub async fn lag_report(&self) -> Vec<PendingLag> {
        self.pending.lag_report().await
    }

    /// Outstanding entries for one secondary
    pub async fn pending_depth(&self, secondary_id: &str) -> usize {
        self.pending.depth(secondary_id).await
    }

    /// This node's id
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Configured secondaries
    pub fn secondaries(&self) -> &[SecondaryConfig] {
        &self.secondaries
    }
}

/// One delivery attempt to one secondary. On success the entry leaves
/// that secondary's outbox and counts toward any open quorum wait; on
/// failure it stays queued with a bumped backoff.
async fn attempt_delivery(
    transport: &dyn ReplicationTransport,
    pending: &PendingSet,
    acks: &AckRegistry,
    secondary: &SecondaryConfig,
    entry: &MessageEntry,
    redelivery: bool,
) {
    match transport.replicate(secondary, entry).await {
        Ok(()) => {
            if redelivery {
                tracing::info!("Redelivered entry {} to {}", entry.id, secondary.id);
            }
            pending.ack(&secondary.id, entry.id).await;
            if acks.record(entry.id, &secondary.id).await {
                tracing::debug!("Ack for entry {} from {}", entry.id, secondary.id);
            }
        }
        Err(e) => {
            tracing::warn!(
                "Replication of entry {} to {} failed: {}",
                entry.id,
                secondary.id,
                e
            );
            pending.record_failure(&secondary.id, entry.id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// In-process transport: delivery succeeds only for secondaries marked
    /// reachable, and every successful delivery is recorded.
    struct MockTransport {
        reachable: RwLock<HashSet<String>>,
        delivered: Mutex<Vec<(String, EntryId)>>,
    }

    impl MockTransport {
        fn new(reachable: &[&str]) -> Self {
            Self {
                reachable: RwLock::new(reachable.iter().map(|s| s.to_string()).collect()),
                delivered: Mutex::new(Vec::new()),
            }
        }

        async fn set_reachable(&self, id: &str, up: bool) {
            let mut reachable = self.reachable.write().await;
            if up {
                reachable.insert(id.to_string());
            } else {
                reachable.remove(id);
            }
        }

        async fn delivered_to(&self, id: &str) -> Vec<EntryId> {
            self.delivered
                .lock()
                .await
                .iter()
                .filter(|(sec, _)| sec == id)
                .map(|(_, entry)| *entry)
                .collect()
        }
    }

    #[async_trait]
    impl ReplicationTransport for MockTransport {
        async fn replicate(
            &self,
            secondary: &SecondaryConfig,
            entry: &MessageEntry,
        ) -> Result<()> {
            if !self.reachable.read().await.contains(&secondary.id) {
                return Err(Error::ConnectionFailed {
                    address: secondary.url.clone(),
                    reason: "unreachable".into(),
                });
            }
            self.delivered
                .lock()
                .await
                .push((secondary.id.clone(), entry.id));
            Ok(())
        }

        async fn fetch_since(
            &self,
            _master_url: &str,
            _secondary_id: &str,
            _cursor: EntryId,
        ) -> Result<Vec<MessageEntry>> {
            Ok(Vec::new())
        }

        async fn acknowledge(
            &self,
            _master_url: &str,
            _secondary_id: &str,
            _last_applied_id: EntryId,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn secondaries() -> Vec<SecondaryConfig> {
        vec![
            SecondaryConfig {
                id: "secondary1".into(),
                url: "http://secondary1:8081".into(),
            },
            SecondaryConfig {
                id: "secondary2".into(),
                url: "http://secondary2:8081".into(),
            },
        ]
    }

    fn test_config() -> ReplicationConfig {
        ReplicationConfig {
            write_timeout: Duration::from_millis(200),
            retry_backoff: Duration::from_millis(1),
            retry_backoff_cap: Duration::from_millis(10),
            ..ReplicationConfig::default()
        }
    }

    fn master_with(transport: Arc<MockTransport>) -> Arc<MasterNode> {
        Arc::new(MasterNode::new(
            "master".into(),
            secondaries(),
            transport,
            test_config(),
        ))
    }

    #[tokio::test]
    async fn test_rejects_invalid_write_concern() {
        let master = master_with(Arc::new(MockTransport::new(&[])));

        assert!(matches!(
            master.submit("bad".into(), 0).await,
            Err(Error::InvalidWriteConcern { w: 0, max: 3 })
        ));
        assert!(matches!(
            master.submit("bad".into(), 4).await,
            Err(Error::InvalidWriteConcern { w: 4, max: 3 })
        ));
        // No id allocated, no side effects
        assert_eq!(master.highest_id().await, 0);
        assert_eq!(master.pending_depth("secondary1").await, 0);
    }

    #[tokio::test]
    async fn test_w1_succeeds_with_all_secondaries_down() {
        let master = master_with(Arc::new(MockTransport::new(&[])));

        let receipt = master.submit("Message W1".into(), 1).await.unwrap();
        assert_eq!(receipt.status, SubmitStatus::Committed);
        assert_eq!(receipt.acks_achieved, 1);
        assert_eq!(receipt.entry.id, 1);
    }

    #[tokio::test]
    async fn test_w2_commits_once_one_secondary_acks() {
        let transport = Arc::new(MockTransport::new(&["secondary1"]));
        let master = master_with(transport.clone());

        let receipt = master.submit("Message W2".into(), 2).await.unwrap();
        assert_eq!(receipt.status, SubmitStatus::Committed);
        assert!(receipt.acks_achieved >= 2);
        assert_eq!(transport.delivered_to("secondary1").await, vec![1]);

        // The unreachable secondary keeps its outbox entry
        assert_eq!(master.pending_depth("secondary2").await, 1);
        assert_eq!(master.pending_depth("secondary1").await, 0);
    }

    #[tokio::test]
    async fn test_w3_degrades_on_timeout_with_achieved_count() {
        let transport = Arc::new(MockTransport::new(&["secondary1"]));
        let master = master_with(transport);

        let receipt = master.submit("Message W3".into(), 3).await.unwrap();
        assert_eq!(receipt.status, SubmitStatus::Degraded);
        assert_eq!(receipt.acks_achieved, 2);
        assert_eq!(receipt.required, 3);
        // Durable on the master despite the degraded response
        assert_eq!(master.highest_id().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_submits_get_unique_monotonic_ids() {
        let master = master_with(Arc::new(MockTransport::new(&[])));

        let mut handles = Vec::new();
        for i in 0..20 {
            let master = master.clone();
            handles.push(tokio::spawn(async move {
                master.submit(format!("msg-{i}"), 1).await.unwrap().entry.id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());

        let log: Vec<_> = master.snapshot().await.iter().map(|e| e.id).collect();
        assert_eq!(log, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_retry_drains_after_secondary_recovers() {
        let transport = Arc::new(MockTransport::new(&[]));
        let master = master_with(transport.clone());

        for i in 0..3 {
            master.submit(format!("offline-{i}"), 1).await.unwrap();
        }
        // Give the spawned live attempts time to fail
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(master.pending_depth("secondary1").await, 3);

        transport.set_reachable("secondary1", true).await;
        for _ in 0..20 {
            master.redeliver_pending().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            if master.pending_depth("secondary1").await == 0 {
                break;
            }
        }

        assert_eq!(master.pending_depth("secondary1").await, 0);
        // Redelivery preserved id order
        assert_eq!(transport.delivered_to("secondary1").await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_catch_up_request_drains_pending() {
        let master = master_with(Arc::new(MockTransport::new(&[])));

        for i in 0..4 {
            master.submit(format!("msg-{i}"), 1).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(master.pending_depth("secondary1").await, 4);

        // Secondary reports it already holds 1..=2 out-of-band
        let entries = master.entries_since(2, Some("secondary1")).await;
        let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(master.pending_depth("secondary1").await, 2);
        // The other secondary's outbox is untouched
        assert_eq!(master.pending_depth("secondary2").await, 4);
    }

    #[tokio::test]
    async fn test_extreme_cursor_from_the_wire_is_handled() {
        let master = master_with(Arc::new(MockTransport::new(&[])));
        master.submit("only".into(), 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Both cursor-bearing operations accept any u64 a client sends
        let entries = master.entries_since(u64::MAX, Some("secondary1")).await;
        assert!(entries.is_empty());
        assert_eq!(master.pending_depth("secondary1").await, 0);

        master.record_ack_through("secondary2", u64::MAX).await;
        assert_eq!(master.pending_depth("secondary2").await, 0);
    }
}
