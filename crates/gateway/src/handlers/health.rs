//! Health check handlers

use crate::AppState;
use achievo_common::store::{ContentStore, DirectoryStore};
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub relational_store: CheckResult,
    pub document_store: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

async fn check<F>(ping: F) -> CheckResult
where
    F: Future<Output = achievo_common::Result<()>>,
{
    let start = Instant::now();
    match ping.await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: achievo_common::VERSION,
    })
}

/// Readiness probe - pings both stores
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let (relational_store, document_store) = tokio::join!(
        check(state.relational.ping()),
        check(state.contents.ping())
    );

    let all_up = relational_store.is_up() && document_store.is_up();
    let status = if all_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if all_up { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks {
                relational_store,
                document_store,
            },
        }),
    )
}
