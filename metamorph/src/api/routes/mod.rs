//! API route modules.

pub mod convert;
pub mod health;
pub mod metrics;

use axum::Router;
use axum::routing::get;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/convert", get(convert::convert))
        .nest("/health", health::router())
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
}
