//! Liveness probe.

use axum::{Router, extract::State, http::StatusCode, routing::get};
use tracing::debug;

use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/ping", get(ping))
}

/// 200 when the storage backend answers, 500 otherwise.
async fn ping(State(state): State<AppState>) -> StatusCode {
    match state.store.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            debug!(error = %e, "Storage ping failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
