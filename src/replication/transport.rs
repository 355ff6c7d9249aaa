//! Replication Transport
//!
//! HTTP client seam between the master and its secondaries. The trait
//! exists so the master, retry worker, and secondary catch-up logic can be
//! exercised in tests without a network; `HttpTransport` is the production
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SecondaryConfig;
use crate::error::{Error, Result};
use crate::log::{EntryId, MessageEntry};

/// Transport operations used by the replication subsystem
#[async_trait]
pub trait ReplicationTransport: Send + Sync {
    /// Push one entry to a secondary. A successful return is that
    /// secondary's acknowledgment (a duplicate on the far side still acks).
    async fn replicate(&self, secondary: &SecondaryConfig, entry: &MessageEntry) -> Result<()>;

    /// Fetch all master entries with id > cursor (catch-up pull)
    async fn fetch_since(
        &self,
        master_url: &str,
        secondary_id: &str,
        cursor: EntryId,
    ) -> Result<Vec<MessageEntry>>;

    /// Report a cumulative acknowledgment cursor to the master
    async fn acknowledge(
        &self,
        master_url: &str,
        secondary_id: &str,
        last_applied_id: EntryId,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ReplicateResponse {
    status: String,
    #[allow(dead_code)]
    id: EntryId,
}

/// HTTP transport over the nodes' JSON APIs
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self { client })
    }

    fn connection_error(address: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::ConnectionTimeout(address.to_string())
        } else if err.is_connect() {
            Error::ConnectionFailed {
                address: address.to_string(),
                reason: err.to_string(),
            }
        } else {
            Error::Http(err)
        }
    }
}

#[async_trait]
impl ReplicationTransport for HttpTransport {
    async fn replicate(&self, secondary: &SecondaryConfig, entry: &MessageEntry) -> Result<()> {
        let url = format!("{}/replicate", secondary.url);
        let response = self
            .client
            .post(&url)
            .json(entry)
            .send()
            .await
            .map_err(|e| Self::connection_error(&secondary.url, e))?;

        if !response.status().is_success() {
            return Err(Error::Replication(format!(
                "secondary {} rejected entry {}: HTTP {}",
                secondary.id,
                entry.id,
                response.status()
            )));
        }

        let body: ReplicateResponse = response.json().await?;
        tracing::debug!(
            "Replicated entry {} to {} ({})",
            entry.id,
            secondary.id,
            body.status
        );
        Ok(())
    }

    async fn fetch_since(
        &self,
        master_url: &str,
        secondary_id: &str,
        cursor: EntryId,
    ) -> Result<Vec<MessageEntry>> {
        let url = format!(
            "{}/catchup?since={}&secondary_id={}",
            master_url, cursor, secondary_id
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::connection_error(master_url, e))?;

        if !response.status().is_success() {
            return Err(Error::Replication(format!(
                "catch-up request failed: HTTP {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn acknowledge(
        &self,
        master_url: &str,
        secondary_id: &str,
        last_applied_id: EntryId,
    ) -> Result<()> {
        let url = format!("{}/ack", master_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "secondary_id": secondary_id,
                "last_applied_id": last_applied_id,
            }))
            .send()
            .await
            .map_err(|e| Self::connection_error(master_url, e))?;

        if !response.status().is_success() {
            return Err(Error::Replication(format!(
                "ack rejected: HTTP {}",
                response.status()
            )));
        }

        Ok(())
    }
}
