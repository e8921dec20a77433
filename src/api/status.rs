//! Public status endpoint (`GET /status`, client port).
//!
//! Safe to expose publicly without authentication.
//! Returns gateway liveness and aggregate metrics only.
//!
//! What this endpoint **does not** include:
//! - Channel names, base URLs, or credentials
//! - Model names
//! - Routing rules or transformer configuration
//!
//! This endpoint is enabled by default and intended to be the one public
//! window into the gateway's health.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /status` — public liveness and metrics endpoint.
///
/// Example response:
/// ```json
/// {
///   "status": "ok",
///   "ready": true,
///   "uptime_secs": 3600,
///   "requests": {
///     "total": 1024,
///     "errors": 3,
///     "error_rate": 0.003,
///     "avg_latency_ms": 87.4
///   }
/// }
/// ```
///
/// `ready` is `false` when no channel is configured — there is nothing for
/// the gateway to route to.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0);
    let stats = state.request_log.stats().await;
    let error_rate = if stats.total_requests == 0 { 0.0 } else { stats.error_count as f64 / stats.total_requests as f64 };

    let channel_count = state.store.channel_snapshot().await.len();
    let ready = channel_count > 0;

    Json(json!({
        "status": "ok",
        "ready": ready,
        "uptime_secs": uptime_secs,
        "requests": {
            "total": stats.total_requests,
            "errors": stats.error_count,
            "error_rate": error_rate,
            "avg_latency_ms": stats.avg_latency_ms,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::config::{Provider, SeedFile};

    async fn state_with_channels(n: usize) -> Arc<AppState> {
        let seed = SeedFile::default();
        let state = AppState::new(seed, "unused.toml".into()).await.unwrap();
        for i in 0..n {
            state.store.insert_channel(Channel::new(i.to_string(), format!("c{i}"), Provider::OpenAI, "k".into())).await;
        }
        Arc::new(state)
    }

    #[tokio::test]
    async fn ready_is_false_with_no_channels() {
        let state = state_with_channels(0).await;
        let body = status(State(state)).await.into_response();
        let bytes = axum::body::to_bytes(body.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["ready"], false);
    }

    #[tokio::test]
    async fn ready_is_true_with_a_channel_configured() {
        let state = state_with_channels(1).await;
        let body = status(State(state)).await.into_response();
        let bytes = axum::body::to_bytes(body.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["ready"], true);
        assert_eq!(json["requests"]["total"], 0);
    }
}
