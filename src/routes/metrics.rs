use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use prometheus::{Encoder, TextEncoder};

use crate::state::AppState;

/// GET /metrics — Prometheus scrape endpoint. Requires `Bearer METRICS_TOKEN`
/// when a token is configured.
pub async fn metrics_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<String, StatusCode> {
    if let Some(expected) = &state.config.metrics_token {
        let given = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if given != Some(expected.as_str()) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
