//! Health check handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub checks: ReadyChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadyChecks {
    pub provider_metadata: &'static str,
}

/// GET /health - Liveness check (fast, no dependencies)
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "gateway-api",
    })
}

/// GET /ready - Readiness check (provider metadata cached)
pub async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, StatusCode> {
    if state.gateway.is_ready().await {
        Ok(Json(ReadyResponse {
            status: "ready",
            service: "gateway-api",
            checks: ReadyChecks {
                provider_metadata: "ok",
            },
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
