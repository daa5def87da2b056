//! Metrics endpoint handler for Prometheus scraping.
//!
//! The guard loop updates the registry on every tick; a scrape only encodes
//! what is already there.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, TextEncoder};
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Scrape failures.
#[derive(Debug)]
pub enum MetricsError {
    Encode(prometheus::Error),
    Utf8(std::string::FromUtf8Error),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        match &self {
            MetricsError::Encode(e) => error!("Failed to encode metrics: {}", e),
            MetricsError::Utf8(e) => error!("Metrics output is not valid UTF-8: {}", e),
        }
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
    }
}

/// Handler for the /metrics endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<Response, MetricsError> {
    let families = state.registry.gather();
    debug!("Encoding {} metric families", families.len());

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(MetricsError::Encode)?;
    let body = String::from_utf8(buffer).map_err(MetricsError::Utf8)?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response())
}
