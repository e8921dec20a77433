//! Prometheus-compatible `/metrics` endpoint (admin port).
//!
//! All rendering lives in [`crate::metrics::Metrics`] — this handler just
//! pulls the shared registry out of state and returns its text exposition.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::state::AppState;

/// `GET /metrics` — renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(text) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], text).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to render metrics: {e}")).into_response(),
    }
}
