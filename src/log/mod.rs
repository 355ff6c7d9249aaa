//! Replicated Log
//!
//! The ordered, append-only message sequence shared by the master and
//! secondary roles.

pub mod entry;
pub mod store;

pub use entry::{EntryId, MessageEntry};
pub use store::{ApplyOutcome, LogStore};
