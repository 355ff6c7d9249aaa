//! HTTP API
//!
//! REST surface for both roles. The master exposes message submission,
//! log listing, catch-up, and the ack sink; a secondary exposes the
//! replication target and its own log listing. Every node serves its full
//! log so convergence can be verified externally.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::log::{ApplyOutcome, EntryId, MessageEntry};
use crate::replication::{MasterNode, PendingLag, SecondaryNode, SubmitReceipt};

// ============ Request/Response Types ============

/// Message submission request
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
    /// Write concern; defaults to 1 (local append only)
    #[serde(default = "default_write_concern")]
    pub w: usize,
}

fn default_write_concern() -> usize {
    1
}

/// Catch-up query parameters
#[derive(Debug, Deserialize)]
pub struct CatchupParams {
    /// Requester's last contiguously applied id
    pub since: EntryId,
    /// Requesting secondary, if it wants its outbox drained
    pub secondary_id: Option<String>,
}

/// Cumulative acknowledgment from a secondary
#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub secondary_id: String,
    pub last_applied_id: EntryId,
}

/// Replication push response
#[derive(Debug, Serialize)]
pub struct ReplicateResponse {
    pub status: &'static str,
    pub id: EntryId,
}

/// Status response (master)
#[derive(Debug, Serialize)]
pub struct MasterStatusResponse {
    pub node_id: String,
    pub role: &'static str,
    pub highest_id: EntryId,
    pub log_len: usize,
    pub secondaries: Vec<PendingLag>,
}

/// Status response (secondary)
#[derive(Debug, Serialize)]
pub struct SecondaryStatusResponse {
    pub node_id: String,
    pub role: &'static str,
    pub last_applied_id: EntryId,
    pub log_len: usize,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub role: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    fn from_error(e: &Error) -> (StatusCode, Json<Self>) {
        let (status, code) = match e {
            Error::InvalidWriteConcern { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_WRITE_CONCERN")
            }
            Error::SecondaryNotFound(_) => (StatusCode::NOT_FOUND, "SECONDARY_NOT_FOUND"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        (
            status,
            Json(Self {
                error: e.to_string(),
                code: code.to_string(),
            }),
        )
    }
}

// ============ Master Router ============

/// Build the master's router
pub fn master_router(node: Arc<MasterNode>) -> Router {
    Router::new()
        .route("/messages", post(handle_submit).get(handle_master_list))
        .route("/catchup", get(handle_catchup))
        .route("/ack", post(handle_ack))
        .route("/status", get(handle_master_status))
        .route("/health", get(handle_master_health))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn handle_submit(
    State(node): State<Arc<MasterNode>>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    match node.submit(req.text, req.w).await {
        Ok(receipt) => submit_response(receipt).into_response(),
        Err(e) => ErrorResponse::from_error(&e).into_response(),
    }
}

fn submit_response(receipt: SubmitReceipt) -> (StatusCode, Json<SubmitReceipt>) {
    // Degraded is still a 200: the entry is durable on the master and
    // replication continues in the background.
    (StatusCode::OK, Json(receipt))
}

async fn handle_master_list(State(node): State<Arc<MasterNode>>) -> Json<Vec<MessageEntry>> {
    Json(node.snapshot().await)
}

async fn handle_catchup(
    State(node): State<Arc<MasterNode>>,
    Query(params): Query<CatchupParams>,
) -> Json<Vec<MessageEntry>> {
    let entries = node
        .entries_since(params.since, params.secondary_id.as_deref())
        .await;
    tracing::info!(
        "Catch-up from {} since {}: {} entries",
        params.secondary_id.as_deref().unwrap_or("<anonymous>"),
        params.since,
        entries.len()
    );
    Json(entries)
}

async fn handle_ack(
    State(node): State<Arc<MasterNode>>,
    Json(req): Json<AckRequest>,
) -> impl IntoResponse {
    let known = node.secondaries().iter().any(|s| s.id == req.secondary_id);
    if !known {
        return ErrorResponse::from_error(&Error::SecondaryNotFound(req.secondary_id))
            .into_response();
    }

    node.record_ack_through(&req.secondary_id, req.last_applied_id)
        .await;
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn handle_master_status(State(node): State<Arc<MasterNode>>) -> Json<MasterStatusResponse> {
    let snapshot_len = node.snapshot().await.len();
    Json(MasterStatusResponse {
        node_id: node.node_id().to_string(),
        role: "master",
        highest_id: node.highest_id().await,
        log_len: snapshot_len,
        secondaries: node.lag_report().await,
    })
}

async fn handle_master_health(State(node): State<Arc<MasterNode>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        node_id: node.node_id().to_string(),
        role: "master",
    })
}

// ============ Secondary Router ============

/// Fault-injection knobs for the secondary surface (demo/testing)
#[derive(Debug, Clone, Default)]
pub struct SecondaryApiOptions {
    /// Probability [0.0, 1.0] of answering 500 after a successful apply
    pub error_rate: f64,
}

#[derive(Clone)]
struct SecondaryState {
    node: Arc<SecondaryNode>,
    options: SecondaryApiOptions,
}

/// Build a secondary's router
pub fn secondary_router(node: Arc<SecondaryNode>, options: SecondaryApiOptions) -> Router {
    Router::new()
        .route("/replicate", post(handle_replicate))
        .route("/messages", get(handle_secondary_list))
        .route("/status", get(handle_secondary_status))
        .route("/health", get(handle_secondary_health))
        .layer(TraceLayer::new_for_http())
        .with_state(SecondaryState { node, options })
}

async fn handle_replicate(
    State(state): State<SecondaryState>,
    Json(entry): Json<MessageEntry>,
) -> impl IntoResponse {
    let id = entry.id;
    let outcome = state.node.apply(entry).await;

    // Unacked-but-applied failure injection: the entry stays in the log,
    // so the master's redelivery observes a duplicate ack.
    if state.options.error_rate > 0.0 && rand::random::<f64>() < state.options.error_rate {
        tracing::warn!("Injected failure after applying entry {}", id);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ReplicateResponse {
                status: "error",
                id,
            }),
        );
    }

    let status = match outcome {
        ApplyOutcome::Applied => "replicated",
        ApplyOutcome::Duplicate => "duplicate",
    };
    (StatusCode::OK, Json(ReplicateResponse { status, id }))
}

async fn handle_secondary_list(State(state): State<SecondaryState>) -> Json<Vec<MessageEntry>> {
    Json(state.node.snapshot().await)
}

async fn handle_secondary_status(
    State(state): State<SecondaryState>,
) -> Json<SecondaryStatusResponse> {
    let log_len = state.node.snapshot().await.len();
    Json(SecondaryStatusResponse {
        node_id: state.node.node_id().to_string(),
        role: "secondary",
        last_applied_id: state.node.last_applied_id().await,
        log_len,
    })
}

async fn handle_secondary_health(State(state): State<SecondaryState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        node_id: state.node.node_id().to_string(),
        role: "secondary",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_defaults_w() {
        let req: SubmitRequest = serde_json::from_str(r#"{"text":"hello"}"#).unwrap();
        assert_eq!(req.w, 1);

        let req: SubmitRequest = serde_json::from_str(r#"{"text":"hello","w":3}"#).unwrap();
        assert_eq!(req.w, 3);
    }

    #[test]
    fn test_invalid_write_concern_maps_to_400() {
        let (status, body) =
            ErrorResponse::from_error(&Error::InvalidWriteConcern { w: 9, max: 3 });
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "INVALID_WRITE_CONCERN");
    }
}
