//! Client-facing API — the port applications send chat-completion requests to.
//!
//! This is intentionally a thin layer: all routing, transformation, and
//! dispatch logic lives in [`crate::pipeline`]. Handlers translate HTTP
//! concerns (status codes, headers, JSON bodies) into a [`crate::pipeline::ChatRequest`]
//! and back.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::pipeline::{self, ChatRequest};
use crate::state::AppState;

/// Build the client-facing axum router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(super::health::healthz))
        .route("/status", get(super::status::status))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

/// POST /v1/chat/completions — route, transform, and dispatch a chat
/// completion. On success the response carries `X-Channel-Name` and, if a
/// routing rule matched, `X-Routing-Rule`; if the preferred channel's
/// breaker was open and the request was rerouted, `X-Circuit-Fallback`
/// names the channel that was skipped.
pub async fn chat_completions(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    let session_id = headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = ChatRequest { method: "POST".into(), path: "/v1/chat/completions".into(), session_id, body };

    match pipeline::dispatch_chat_completion(&state, request).await {
        Ok(response) => {
            let mut out_headers = HeaderMap::new();
            if let Ok(v) = HeaderValue::from_str(&response.channel_name) {
                out_headers.insert("x-channel-name", v);
            }
            if let Some(rule) = &response.rule_name {
                if let Ok(v) = HeaderValue::from_str(rule) {
                    out_headers.insert("x-routing-rule", v);
                }
            }
            if let Some(skipped) = &response.circuit_fallback_from {
                if let Ok(v) = HeaderValue::from_str(skipped) {
                    out_headers.insert("x-circuit-fallback", v);
                }
            }
            (StatusCode::OK, out_headers, Json(response.body)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /v1/models — every model name any enabled channel declares support for.
/// Channels with an empty `models` list (meaning "any") are omitted, since
/// they don't name a specific model.
pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let channels = state.store.channel_snapshot().await;

    let mut seen = std::collections::HashSet::new();
    let models: Vec<Value> = channels
        .iter()
        .flat_map(|c| c.models.iter().map(move |m| (m.clone(), c.name.clone())))
        .filter(|(model, _)| seen.insert(model.clone()))
        .map(|(model, channel)| {
            json!({
                "id": model,
                "object": "model",
                "owned_by": channel,
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": models }))
}
