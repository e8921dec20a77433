//! Liveness probe shared by both the client and admin listeners.
//!
//! Intentionally dependency-free: it never touches the store, the breaker
//! state, or an upstream provider, so it stays truthful as a container
//! liveness probe even while the gateway itself is degraded.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// `GET /healthz` — 200 OK with `{"status": "ok"}`, unconditionally.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
