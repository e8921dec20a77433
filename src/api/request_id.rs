//! Request-ID middleware: assigns a correlation ID to every request so it
//! can be traced through the routing decision, the dispatch attempt(s), the
//! admin traffic log, and the response.
//!
//! - Honors a caller-supplied `X-Request-ID` if present, generates a UUID v4
//!   otherwise.
//! - Stashed as an axum [`Extension`] for downstream handlers.
//! - Wraps the rest of the request in a [`tracing`] span carrying the ID, so
//!   every log line for the request is correlated without threading the ID
//!   through every function signature by hand.
//! - Echoed back as the `X-Request-ID` response header.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument as _;
use uuid::Uuid;

/// Carries the ID assigned to the current request.
///
/// ```rust,ignore
/// async fn handler(Extension(req_id): Extension<RequestId>) { ... }
/// ```
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Assigns a [`RequestId`] to every request passing through this layer.
///
/// Apply this **inside** `tower_http::TraceLayer` so the ID is already on
/// the request extensions by the time the trace span opens.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));

    let span = tracing::debug_span!("request", id = %id);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", header_value);
    }

    response
}
