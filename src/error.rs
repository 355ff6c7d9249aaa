//! Replilog Error Types

use thiserror::Error;

/// Result type alias for replilog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Replilog error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Write path errors
    #[error("Invalid write concern {w}: must be between 1 and {max}")]
    InvalidWriteConcern { w: usize, max: usize },

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Secondary not found: {0}")]
    SecondaryNotFound(String),

    // Network errors
    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable by the pending/retry queue
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Http(_)
                | Error::Replication(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ConnectionTimeout("sec-1:8081".into()).is_retryable());
        assert!(Error::ConnectionFailed {
            address: "sec-1:8081".into(),
            reason: "refused".into(),
        }
        .is_retryable());
        assert!(!Error::InvalidWriteConcern { w: 9, max: 3 }.is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }
}
