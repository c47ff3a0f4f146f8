//! Informational endpoints.

use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde_json::json;

use crate::AppState;

/// `GET /health`.
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "multi_tenant": true,
        "global_credentials": state.global_manager.is_some(),
    }))
}

/// `GET /metrics`.
pub async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.requests_served.load(Ordering::Relaxed),
        "tenants_cached": state.tenants.len().await,
    }))
}

/// `GET /`.
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/v1/chat/completions",
            "/v1/messages",
            "/v1beta/models/{model}:generateContent",
            "/v1beta/models/{model}:streamGenerateContent",
            "/v1/models",
            "/health",
            "/metrics",
        ],
    }))
}
