use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pkg_leases::LeaseError;
use pkg_metrics::names;
use pkg_types::lease::timestamp;
use serde_json::json;
use tracing::{error, info};

use crate::AppState;

/// Map a manager failure onto the HTTP contract: missing ids and an empty
/// pool are 404, anything store-related is 500.
fn error_response(state: &AppState, err: LeaseError, not_found: String) -> Response {
    match err.into_public() {
        LeaseError::NotFound(_) | LeaseError::NoneAvailable => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": not_found }))).into_response()
        }
        e => {
            error!("Lease request failed: {}", e);
            state.metrics.inc(names::STORE_ERRORS);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal Server Error" })),
            )
                .into_response()
        }
    }
}

/// POST /keys — mint a new lease.
pub async fn create_lease(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.create().await {
        Ok(lease) => {
            state.metrics.inc(names::LEASES_CREATED);
            (StatusCode::CREATED, Json(lease)).into_response()
        }
        Err(e) => error_response(&state, e, "Failed to create key".to_string()),
    }
}

/// GET /keys/{id} — describe one lease.
pub async fn get_lease(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.manager.describe(&id).await {
        Ok(lease) => (StatusCode::OK, Json(lease)).into_response(),
        Err(e) => error_response(&state, e, format!("Key: {} not found", id)),
    }
}

/// GET /keys — check out the oldest available lease.
pub async fn checkout_lease(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.checkout().await {
        Ok(lease) => {
            state.metrics.inc(names::LEASES_CHECKED_OUT);
            (StatusCode::OK, Json(json!({ "key": lease.id }))).into_response()
        }
        Err(LeaseError::NoneAvailable) => {
            state.metrics.inc(names::CHECKOUTS_EMPTY);
            info!("Checkout found no available keys");
            error_response(
                &state,
                LeaseError::NoneAvailable,
                "No available keys found".to_string(),
            )
        }
        Err(e) => error_response(&state, e, "No available keys found".to_string()),
    }
}

/// PUT /keys/{id} — release (unblock) a lease.
pub async fn release_lease(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.release(&id).await {
        Ok(_) => {
            state.metrics.inc(names::LEASES_RELEASED);
            (
                StatusCode::OK,
                Json(json!({ "message": format!("{} is unblocked", id) })),
            )
                .into_response()
        }
        Err(e) => error_response(&state, e, "Key not found".to_string()),
    }
}

/// PUT /keepalive/{id} — push a lease's expiry out by one TTL.
pub async fn keepalive_lease(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.keepalive(&id).await {
        Ok(expiry) => {
            state.metrics.inc(names::KEEPALIVES);
            (
                StatusCode::OK,
                Json(json!({
                    "message": "Timer reset",
                    "expiry": timestamp::format(&expiry),
                })),
            )
                .into_response()
        }
        Err(e) => error_response(&state, e, "Key not found".to_string()),
    }
}

/// DELETE /keys/{id} — remove a lease and everything indexing it.
pub async fn delete_lease(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.delete(&id).await {
        Ok(()) => {
            state.metrics.inc(names::LEASES_DELETED);
            (
                StatusCode::OK,
                Json(json!({ "message": format!("key: {} is deleted", id) })),
            )
                .into_response()
        }
        Err(e) => error_response(&state, e, "Key not found".to_string()),
    }
}
