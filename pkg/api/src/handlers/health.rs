use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use pkg_metrics::names;
use tracing::warn;

use crate::AppState;

/// GET /healthz — succeeds when the store answers a ping.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.ping().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response(),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "store unavailable"})),
            )
                .into_response()
        }
    }
}

/// GET /metrics — Prometheus text exposition, with pool gauges refreshed first.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.stats().await {
        Ok(stats) => {
            state.metrics.set(names::LEASES, stats.leases as i64);
            state
                .metrics
                .set(names::LEASES_AVAILABLE, stats.available as i64);
        }
        Err(e) => warn!("Failed to refresh pool gauges: {}", e),
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
