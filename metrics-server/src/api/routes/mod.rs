//! API route modules.

pub mod health;
pub mod index;
pub mod metrics;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(index::router())
        .merge(health::router())
        .merge(metrics::router())
        .with_state(state)
}
