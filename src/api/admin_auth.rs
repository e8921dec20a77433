//! Bearer-token authentication middleware for the admin API.
//!
//! When `admin_token_env` is configured in `[gateway]`, all admin routes
//! require an `Authorization: Bearer <token>` header. Requests with a missing
//! or incorrect token are rejected with `401 Unauthorized`.
//!
//! When `admin_token_env` is absent the middleware is a no-op — admin auth is
//! disabled. This is acceptable when the admin port is strictly firewalled to
//! trusted hosts only.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

/// Axum middleware: requires a valid `Authorization: Bearer <token>` header
/// on every admin route when `state.admin_token` is set.
pub async fn admin_auth_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let Some(expected) = &state.admin_token else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected.as_str() => next.run(req).await,
        Some(_) => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer realm=\"routex admin\"")],
            "Invalid admin token.",
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer realm=\"routex admin\"")],
            "Admin API requires Authorization: Bearer <token>.",
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::Request as HttpRequest,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn state_with_token(token: Option<&str>) -> Arc<AppState> {
        let mut seed = crate::config::SeedFile::default();
        if let Some(t) = token {
            std::env::set_var("ROUTEX_TEST_ADMIN_TOKEN", t);
            seed.gateway.admin_token_env = Some("ROUTEX_TEST_ADMIN_TOKEN".into());
        }
        Arc::new(AppState::new(seed, "unused.toml".into()).await.unwrap())
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/admin/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
            .with_state(state)
    }

    #[tokio::test]
    async fn no_token_configured_passes_through() {
        let state = state_with_token(None).await;
        let req = HttpRequest::builder().uri("/admin/ping").body(Body::empty()).unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_rejected_when_token_configured() {
        let state = state_with_token(Some("secret")).await;
        let req = HttpRequest::builder().uri("/admin/ping").body(Body::empty()).unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_bearer_token_is_accepted() {
        let state = state_with_token(Some("secret")).await;
        let req = HttpRequest::builder()
            .uri("/admin/ping")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let resp = app(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong");
    }
}
