//! Liveness probe with a snapshot of the session registry.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::http::AppState;

pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(health_check))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    users: usize,
}

/// Liveness check with registry gauges
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        sessions: state.registry.session_count(),
        users: state.registry.user_count(),
    })
}
