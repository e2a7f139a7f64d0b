//! Reference ingestion sink
//!
//! The smallest server the collector can deliver to. It checks that the body
//! is a JSON array and accepts it; individual events are not validated.
//!
//! # Endpoints
//!
//! - `POST /api/ingest` - batch of events (JSON array)
//! - `GET /health` - health check

use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::error::Result;

/// Path the collector should be pointed at
pub const INGEST_PATH: &str = "/api/ingest";

/// Batches received so far, in arrival order.
///
/// Holds every payload it is given; only attach one to short-lived servers.
#[derive(Debug, Default)]
pub struct IngestLog {
    batches: Mutex<Vec<Vec<Value>>>,
}

impl IngestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Value>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every received event, flattened across batches
    pub fn events(&self) -> Vec<Value> {
        self.batches().into_iter().flatten().collect()
    }

    fn push(&self, batch: Vec<Value>) {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch);
    }
}

/// Build the sink's router.
///
/// Without a recorder, accepted batches are logged and discarded.
pub fn router(recorder: Option<Arc<IngestLog>>) -> Router {
    Router::new()
        .route(INGEST_PATH, post(ingest))
        .route("/health", get(health))
        .with_state(recorder)
}

/// Serve the sink on an already-bound listener until the task is dropped
pub async fn serve(listener: TcpListener, recorder: Option<Arc<IngestLog>>) -> Result<()> {
    axum::serve(listener, router(recorder)).await?;
    Ok(())
}

/// POST /api/ingest
pub async fn ingest(
    State(recorder): State<Option<Arc<IngestLog>>>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected unparseable batch");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Payload must be valid JSON"})),
            );
        }
    };

    let Value::Array(events) = parsed else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Payload must be an array"})),
        );
    };

    tracing::info!(events = events.len(), "Received batch");
    if let Some(recorder) = recorder {
        recorder.push(events);
    }

    (StatusCode::OK, Json(json!({"success": true})))
}

async fn health() -> &'static str {
    "ok"
}
