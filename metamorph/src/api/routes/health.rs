//! Health check routes.

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/live", get(liveness_check))
        .route("/ready", get(readiness_check))
}

/// Liveness check - is the process responsive?
async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check - can we reach the KV store? Without a KV (single-node
/// mode) readiness equals liveness.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match &state.kv {
        Some(kv) => match kv.get("metamorph:health").await {
            Ok(_) => (StatusCode::OK, "ready"),
            Err(e) => {
                tracing::warn!(error = %e, "readiness probe failed");
                (StatusCode::SERVICE_UNAVAILABLE, "not ready")
            }
        },
        None => (StatusCode::OK, "ready"),
    }
}
