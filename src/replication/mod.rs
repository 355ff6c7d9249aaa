//! Replication Module
//!
//! Master-side ingestion, write-concern accounting, and redelivery, plus
//! the secondary-side apply engine and catch-up client.

pub mod acks;
pub mod master;
pub mod pending;
pub mod secondary;
pub mod transport;

pub use acks::AckRegistry;
pub use master::{MasterNode, SubmitReceipt, SubmitStatus};
pub use pending::{PendingLag, PendingSet, RetryWorker};
pub use secondary::SecondaryNode;
pub use transport::{HttpTransport, ReplicationTransport};

use std::time::Duration;

/// Tuning knobs for replication
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Bound on a w >= 2 submit's quorum wait
    pub write_timeout: Duration,
    /// Retry worker tick interval
    pub retry_tick: Duration,
    /// Base backoff between redelivery attempts
    pub retry_backoff: Duration,
    /// Cap on the redelivery backoff
    pub retry_backoff_cap: Duration,
    /// Consecutive gapped watchdog ticks before defensive catch-up
    pub gap_ticks: u32,
    /// Gap watchdog tick interval
    pub watchdog_tick: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            retry_tick: Duration::from_millis(200),
            retry_backoff: Duration::from_millis(500),
            retry_backoff_cap: Duration::from_secs(15),
            gap_ticks: 2,
            watchdog_tick: Duration::from_millis(500),
        }
    }
}

impl From<&crate::config::ReplilogConfig> for ReplicationConfig {
    fn from(config: &crate::config::ReplilogConfig) -> Self {
        Self {
            write_timeout: config.write_timeout(),
            retry_tick: config.retry_tick(),
            retry_backoff: config.retry_backoff(),
            retry_backoff_cap: config.retry_backoff_cap(),
            gap_ticks: config.cluster.gap_ticks,
            watchdog_tick: config.watchdog_tick(),
        }
    }
}
