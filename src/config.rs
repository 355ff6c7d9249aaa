//! Replilog Configuration
//!
//! Configuration structures for the replicated message log service.
//! Loaded from a TOML file; one file describes the whole cluster so the
//! same config can be shipped to the master and every secondary.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main replilog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplilogConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Cluster topology and replication tuning
    pub cluster: ClusterConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Address to bind the HTTP API on
    pub bind_address: String,
}

/// A secondary known to the master
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryConfig {
    /// Secondary node identifier
    pub id: String,

    /// Base URL of the secondary's API (e.g. "http://secondary1:8081")
    pub url: String,
}

/// Cluster topology and replication tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Base URL of the master's API (used by secondaries for catch-up/acks)
    #[serde(default)]
    pub master_url: String,

    /// Secondaries the master replicates to
    #[serde(default)]
    pub secondaries: Vec<SecondaryConfig>,

    /// Bound on a w >= 2 submit's quorum wait, in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Per-request replication timeout in milliseconds
    #[serde(default = "default_replication_timeout_ms")]
    pub replication_timeout_ms: u64,

    /// Retry worker tick interval in milliseconds
    #[serde(default = "default_retry_tick_ms")]
    pub retry_tick_ms: u64,

    /// Base backoff between redelivery attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Cap on the redelivery backoff in milliseconds
    #[serde(default = "default_retry_backoff_cap_ms")]
    pub retry_backoff_cap_ms: u64,

    /// Consecutive watchdog ticks a log gap must persist before a
    /// secondary requests defensive catch-up
    #[serde(default = "default_gap_ticks")]
    pub gap_ticks: u32,

    /// Gap watchdog tick interval in milliseconds (secondaries)
    #[serde(default = "default_watchdog_tick_ms")]
    pub watchdog_tick_ms: u64,

    /// Artificial apply delay in milliseconds (secondaries; demo/testing)
    #[serde(default)]
    pub replica_delay_ms: u64,

    /// Probability [0.0, 1.0] of returning an error after a successful
    /// apply (secondaries; demo/testing)
    #[serde(default)]
    pub error_rate: f64,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,

    /// Request body limit in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_replication_timeout_ms() -> u64 {
    3000
}

fn default_retry_tick_ms() -> u64 {
    200
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_retry_backoff_cap_ms() -> u64 {
    15_000
}

fn default_gap_ticks() -> u32 {
    2
}

fn default_watchdog_tick_ms() -> u64 {
    500
}

fn default_body_limit() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_enabled: false,
            body_limit: default_body_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ReplilogConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ReplilogConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config(
                "node.bind_address cannot be empty".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.cluster.error_rate) {
            return Err(crate::Error::Config(
                "cluster.error_rate must be between 0.0 and 1.0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for sec in &self.cluster.secondaries {
            if sec.id.is_empty() || sec.url.is_empty() {
                return Err(crate::Error::Config(
                    "cluster.secondaries entries need both id and url".into(),
                ));
            }
            if !seen.insert(sec.id.as_str()) {
                return Err(crate::Error::Config(format!(
                    "duplicate secondary id: {}",
                    sec.id
                )));
            }
        }

        Ok(())
    }

    /// Maximum accepted write concern (master plus all secondaries)
    pub fn max_write_concern(&self) -> usize {
        self.cluster.secondaries.len() + 1
    }

    /// Get quorum wait bound as Duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.write_timeout_ms)
    }

    /// Get per-request replication timeout as Duration
    pub fn replication_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.replication_timeout_ms)
    }

    /// Get retry worker tick as Duration
    pub fn retry_tick(&self) -> Duration {
        Duration::from_millis(self.cluster.retry_tick_ms)
    }

    /// Get base redelivery backoff as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.cluster.retry_backoff_ms)
    }

    /// Get redelivery backoff cap as Duration
    pub fn retry_backoff_cap(&self) -> Duration {
        Duration::from_millis(self.cluster.retry_backoff_cap_ms)
    }

    /// Get gap watchdog tick as Duration
    pub fn watchdog_tick(&self) -> Duration {
        Duration::from_millis(self.cluster.watchdog_tick_ms)
    }

    /// Get artificial apply delay as Duration, if configured
    pub fn replica_delay(&self) -> Option<Duration> {
        if self.cluster.replica_delay_ms > 0 {
            Some(Duration::from_millis(self.cluster.replica_delay_ms))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "master"
bind_address = "0.0.0.0:8080"

[cluster]
write_timeout_ms = 2000
secondaries = [
    { id = "secondary1", url = "http://secondary1:8081" },
    { id = "secondary2", url = "http://secondary2:8081" },
]
"#;

        let config = ReplilogConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id, "master");
        assert_eq!(config.cluster.secondaries.len(), 2);
        assert_eq!(config.max_write_concern(), 3);
        assert_eq!(config.write_timeout(), Duration::from_millis(2000));
        // defaults
        assert_eq!(config.cluster.retry_backoff_ms, 500);
        assert_eq!(config.cluster.gap_ticks, 2);
        assert!(config.replica_delay().is_none());
    }

    #[test]
    fn test_secondary_config() {
        let toml = r#"
[node]
id = "secondary1"
bind_address = "0.0.0.0:8081"

[cluster]
master_url = "http://master:8080"
replica_delay_ms = 250
"#;

        let config = ReplilogConfig::from_str(toml).unwrap();
        assert_eq!(config.cluster.master_url, "http://master:8080");
        assert_eq!(config.replica_delay(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_rejects_duplicate_secondary_id() {
        let toml = r#"
[node]
id = "master"
bind_address = "0.0.0.0:8080"

[cluster]
secondaries = [
    { id = "secondary1", url = "http://a:8081" },
    { id = "secondary1", url = "http://b:8081" },
]
"#;

        assert!(ReplilogConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_rejects_bad_error_rate() {
        let toml = r#"
[node]
id = "secondary1"
bind_address = "0.0.0.0:8081"

[cluster]
error_rate = 1.5
"#;

        assert!(ReplilogConfig::from_str(toml).is_err());
    }
}
