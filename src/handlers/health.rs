//! Health check endpoint handler.
//!
//! Returns the guard's running statistics as a plain-text table. The status
//! is 503 until the first tick has completed.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let (status, message) = if state.stats.total_ticks() > 0 {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Waiting for first tick")
    };

    let table = state.stats.render_table();
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\n{table}"),
    )
}
