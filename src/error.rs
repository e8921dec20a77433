//! Unified error type for the gateway core and its axum handlers.
//!
//! [`RoutexErrorKind`] is the tagged-variant error taxonomy from the design
//! (validation, not-found, no-eligible-channel, transformer failure, upstream
//! failure, timeout, circuit-open-fallback). [`AppError`] wraps it, maps each
//! kind to the right HTTP status, and implements [`IntoResponse`] so handlers
//! can return `Result<T, AppError>` and propagate with `?` — the same pattern
//! the teacher's `error.rs` uses, generalized to carry a typed kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Tagged error kinds, per the error-handling design. Kept separate from
/// `anyhow::Error` so callers can match on *why* something failed (e.g. to
/// decide whether to retry on a different channel) without string-sniffing.
#[derive(Debug, Error)]
pub enum RoutexErrorKind {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no eligible channel: {0}")]
    ServiceUnavailable(String),

    #[error("transformer `{name}` failed: {source}")]
    Transformer {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Not a terminal failure — the request proceeded on a fallback channel
    /// after the preferred one was found circuit-open. Surfaced in headers
    /// and metrics, never returned to the client as a failure by itself.
    #[error("circuit open on preferred channel, fell back to `{fallback_channel}`")]
    CircuitOpen { fallback_channel: String },
}

impl RoutexErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Transformer { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::CircuitOpen { .. } => StatusCode::OK,
        }
    }

    /// Machine-readable kind name, used as `error.kind` in the JSON body.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFoundError",
            Self::ServiceUnavailable(_) => "ServiceUnavailableError",
            Self::Transformer { .. } => "TransformerError",
            Self::Upstream(_) => "UpstreamError",
            Self::Timeout(_) => "TimeoutError",
            Self::CircuitOpen { .. } => "CircuitOpen",
        }
    }
}

/// Wraps [`anyhow::Error`] so it can be returned from axum handlers.
///
/// Any type that implements `Into<anyhow::Error>` (which includes `io::Error`,
/// `reqwest::Error`, and [`RoutexErrorKind`]) can be converted into an
/// [`AppError`] via the blanket [`From`] implementation.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    fn downcast_kind(&self) -> Option<&RoutexErrorKind> {
        self.0.downcast_ref::<RoutexErrorKind>()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind_name) = match self.downcast_kind() {
            Some(kind) => (kind.status_code(), kind.kind_name()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        if status.is_server_error() {
            tracing::warn!(error = %self.0, kind = kind_name, "handler error");
        } else {
            tracing::debug!(error = %self.0, kind = kind_name, "handler rejected request");
        }

        (
            status,
            Json(json!({
                "error": { "kind": kind_name, "message": self.0.to_string() }
            })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        let err: AppError = RoutexErrorKind::Validation("bad body".into()).into();
        assert_eq!(err.downcast_kind().unwrap().status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn service_unavailable_maps_to_503() {
        let err: AppError = RoutexErrorKind::ServiceUnavailable("no channel".into()).into();
        assert_eq!(
            err.downcast_kind().unwrap().status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn plain_anyhow_error_has_no_kind() {
        let err: AppError = anyhow::anyhow!("boom").into();
        assert!(err.downcast_kind().is_none());
    }

    #[test]
    fn into_response_sets_kind_field() {
        let err: AppError = RoutexErrorKind::NotFound("channel `x`".into()).into();
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
