//! Replilog - Replicated Message Log
//!
//! A minimal replicated log service: one master accepts append-only text
//! messages and propagates them to a fixed set of secondaries, with a
//! tunable write concern per submission.
//!
//! # Architecture
//!
//! The master assigns ids, appends locally, and fans out to every
//! secondary in parallel. A per-secondary pending/retry queue guarantees
//! eventual in-order delivery across outages, and a pull-based catch-up
//! protocol lets a restarted secondary reconcile its log with the master
//! without duplication or reordering.
//!
//! # Features
//!
//! - Write-concern-gated acknowledgment (w = 1 up to cluster-wide)
//! - Idempotent, order-insensitive apply on secondaries
//! - Per-secondary outbox with capped exponential backoff redelivery
//! - Catch-up synchronization for restarted or lagging secondaries
//! - HTTP/JSON API for submission, listing, and convergence checks

pub mod api;
pub mod config;
pub mod error;
pub mod log;
pub mod replication;

pub use config::ReplilogConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ReplilogConfig;
    pub use crate::error::{Error, Result};
    pub use crate::log::{ApplyOutcome, EntryId, LogStore, MessageEntry};
    pub use crate::replication::{
        MasterNode, ReplicationConfig, RetryWorker, SecondaryNode, SubmitReceipt, SubmitStatus,
    };
}
