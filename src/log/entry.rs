//! Log Entry Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entry identifier, assigned exclusively by the master.
/// Strictly increasing from 1 with no gaps under normal operation.
pub type EntryId = u64;

/// A single immutable message in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    /// Monotonically increasing id (>= 1)
    pub id: EntryId,
    /// Message payload
    pub text: String,
    /// Assignment time on the master
    pub created_at: DateTime<Utc>,
}

impl MessageEntry {
    /// Create a new entry stamped with the current time
    pub fn new(id: EntryId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_json_shape() {
        let entry = MessageEntry::new(7, "hello");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["text"], "hello");
        assert!(json["created_at"].is_string());

        let restored: MessageEntry = serde_json::from_value(json).unwrap();
        assert_eq!(restored, entry);
    }
}
