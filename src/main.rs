use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

mod api;
mod backends;
mod channel;
mod config;
mod content_analyzer;
mod error;
mod load_balancer;
mod metrics;
mod pipeline;
mod session_affinity;
mod smart_router;
mod state;
mod store;
mod tee;
mod token_estimator;
mod traffic;
mod transformers;

pub use config::SeedFile;
pub use error::AppError;
pub use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit immediately.
    // This avoids needing any external tool (curl/wget) in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    let seed_probe = std::env::var("ROUTEX_CONFIG").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/etc/routex/config.toml"));
    let log_format = SeedFile::load(&seed_probe).map(|s| s.gateway.log_format).unwrap_or_else(|_| "pretty".into());
    init_tracing(&log_format);

    let config_path = seed_probe;
    let seed = SeedFile::load(&config_path).with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(client_port = seed.gateway.client_port, admin_port = seed.gateway.admin_port, "routex starting");

    let state = Arc::new(AppState::new(seed, config_path).await?);

    // Spawn the tee flusher and the config hot-reload poller.
    state.tee.spawn_flusher();
    tokio::spawn(config_watcher(Arc::clone(&state)));

    let gateway = state.gateway.read().await.clone();
    let client_addr: SocketAddr = format!("0.0.0.0:{}", gateway.client_port).parse()?;
    let admin_addr: SocketAddr = format!("0.0.0.0:{}", gateway.admin_port).parse()?;

    info!(%client_addr, "client API listening");
    info!(%admin_addr, "admin API listening");

    let client_listener = tokio::net::TcpListener::bind(client_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;

    let trace_layer = || {
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO))
    };

    let client_app = api::client::router(Arc::clone(&state))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), api::rate_limit::rate_limit_middleware))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());
    let admin_app = api::admin::router(Arc::clone(&state))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer());

    let result = tokio::select! {
        result = axum::serve(client_listener, client_app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result.context("client API server error")
        }
        result = axum::serve(admin_listener, admin_app) => {
            result.context("admin API server error")
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    state.tee.shutdown().await;
    result
}

fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "routex=info,tower_http=warn".into());
    if log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Lightweight healthcheck: GET /healthz and exit 0 on 200, 1 otherwise.
/// Invoked via `routex --healthcheck` from Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("ROUTEX_CLIENT_PORT").ok().and_then(|v| v.parse::<u16>().ok()).unwrap_or(8080);

    let url = format!("http://127.0.0.1:{port}/healthz");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}

/// Background task: polls the config file every 5 seconds and merges in any
/// channel/rule/tee entries that are new by name. See
/// [`AppState::reload_from_disk`] for the merge discipline.
async fn config_watcher(state: Arc<AppState>) {
    let path = state.config_path.clone();

    let mut last_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

    // Initial tick fires immediately; skip it so we don't reload on startup.
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.tick().await;

    loop {
        interval.tick().await;

        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        if mtime == last_mtime {
            continue;
        }

        match state.reload_from_disk().await {
            Ok(()) => {
                info!(path = %path.display(), "config hot-reloaded");
                last_mtime = mtime;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config reload failed — keeping previous config");
            }
        }
    }
}
