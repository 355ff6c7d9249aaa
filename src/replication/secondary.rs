//! Secondary Node Implementation
//!
//! Applies entries arriving from either the master's live push or a
//! catch-up pull through one idempotent path, and reconciles with the
//! master whenever the local log is behind or has a hole.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::interval;

use crate::error::Result;
use crate::log::{ApplyOutcome, EntryId, LogStore, MessageEntry};
use crate::replication::transport::ReplicationTransport;
use crate::replication::ReplicationConfig;

/// Secondary node state
pub struct SecondaryNode {
    node_id: String,
    log: Arc<RwLock<LogStore>>,
    master_url: String,
    transport: Arc<dyn ReplicationTransport>,
    config: ReplicationConfig,
    /// Artificial apply delay (demo/testing; None in normal operation)
    apply_delay: Option<Duration>,
    shutdown: RwLock<bool>,
}

impl SecondaryNode {
    /// Create a new secondary node
    pub fn new(
        node_id: String,
        master_url: String,
        transport: Arc<dyn ReplicationTransport>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            node_id,
            log: Arc::new(RwLock::new(LogStore::new())),
            master_url,
            transport,
            config,
            apply_delay: None,
            shutdown: RwLock::new(false),
        }
    }

    /// Inject an artificial delay before every apply
    pub fn with_apply_delay(mut self, delay: Option<Duration>) -> Self {
        self.apply_delay = delay;
        self
    }

    /// Apply one entry. Both live push and catch-up batches come through
    /// here, so re-delivery of an already-stored id is a no-op, never an
    /// error. Out-of-order arrivals are stored immediately;
    /// `last_applied_id` advances only while the prefix is gap-free.
    pub async fn apply(&self, entry: MessageEntry) -> ApplyOutcome {
        if let Some(delay) = self.apply_delay {
            tracing::debug!("Delaying apply of entry {} by {:?}", entry.id, delay);
            tokio::time::sleep(delay).await;
        }

        let entry_id = entry.id;
        let outcome = self.log.write().await.insert(entry);
        match outcome {
            ApplyOutcome::Applied => tracing::info!("Applied entry {}", entry_id),
            ApplyOutcome::Duplicate => tracing::debug!("Ignored duplicate entry {}", entry_id),
        }
        outcome
    }

    /// One bounded catch-up round trip: pull everything after our cursor,
    /// apply it, and report the new cursor back so the master can drain
    /// our outbox and credit any quorum waits. Returns the number of
    /// newly applied entries.
    pub async fn catch_up(&self) -> Result<usize> {
        let cursor = self.last_applied_id().await;
        let batch = self
            .transport
            .fetch_since(&self.master_url, &self.node_id, cursor)
            .await?;

        let mut applied = 0;
        for entry in batch {
            if self.apply(entry).await == ApplyOutcome::Applied {
                applied += 1;
            }
        }

        let new_cursor = self.last_applied_id().await;
        if applied > 0 {
            tracing::info!(
                "Caught up {} entries from master (cursor {} -> {})",
                applied,
                cursor,
                new_cursor
            );
        }

        if let Err(e) = self
            .transport
            .acknowledge(&self.master_url, &self.node_id, new_cursor)
            .await
        {
            // Ack loss is harmless: a later catch-up or redelivery
            // converges the master's view of us.
            tracing::warn!("Failed to report cursor {} to master: {}", new_cursor, e);
        }

        Ok(applied)
    }

    /// Catch up at startup, retrying until the master is reachable
    pub async fn catch_up_at_startup(&self) {
        let mut attempt: u32 = 0;
        loop {
            if *self.shutdown.read().await {
                return;
            }
            match self.catch_up().await {
                Ok(applied) => {
                    tracing::info!(
                        "Startup catch-up complete: {} entries, last_applied_id={}",
                        applied,
                        self.last_applied_id().await
                    );
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    let backoff = Duration::from_secs(2u64.pow(attempt.min(5)));
                    tracing::warn!(
                        "Startup catch-up failed (attempt {}): {}. Retrying in {:?}",
                        attempt,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Gap watchdog: when a hole in the local log survives a few
    /// consecutive ticks (a lost live push, not a reordered in-flight
    /// one), pull the missing range from the master.
    pub async fn run_watchdog(&self) {
        let mut ticker = interval(self.config.watchdog_tick);
        let mut gap_streak: u32 = 0;

        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }

            if self.log.read().await.has_gap() {
                gap_streak += 1;
                if gap_streak >= self.config.gap_ticks {
                    tracing::warn!(
                        "Log gap persisted for {} ticks, requesting catch-up",
                        gap_streak
                    );
                    if let Err(e) = self.catch_up().await {
                        tracing::warn!("Defensive catch-up failed: {}", e);
                    }
                    gap_streak = 0;
                }
            } else {
                gap_streak = 0;
            }
        }
        tracing::info!("Gap watchdog stopped");
    }

    /// Stop background loops
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }

    /// Highest id contiguously applied from 1
    pub async fn last_applied_id(&self) -> EntryId {
        self.log.read().await.last_applied_id()
    }

    /// Ordered snapshot of the local log
    pub async fn snapshot(&self) -> Vec<MessageEntry> {
        self.log.read().await.snapshot()
    }

    /// This node's id
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}
