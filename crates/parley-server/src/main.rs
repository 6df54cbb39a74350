//! # Parley Server
//!
//! Real-time chat server: REST registration and room listing, WebSocket
//! rooms with history replay, durable message log.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley-server
//!
//! # Run with a config file in ./parley.toml, /etc/parley/ or ~/.config/parley/
//! parley-server
//!
//! # Run with environment variables
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 parley-server
//! ```

mod auth;
mod config;
mod metrics;
mod ratelimit;
mod rest;
mod ws;

use anyhow::{Context, Result};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Router};
use parley_core::{Hub, HubConfig};
use parley_store::Store;
use ratelimit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long in-flight connections get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: config::Config,
    /// Persistence layer.
    pub store: Store,
    /// In-memory room registry.
    pub hub: Arc<Hub>,
    /// Request limiter; `None` when disabled.
    pub limiter: Option<Arc<RateLimiter>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,parley_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    info!("Starting Parley server on {}:{}", config.host, config.port);

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(err) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", err);
        }
    }

    let store = Store::connect(&config.database.url)
        .await
        .context("failed to open database")?;

    let hub = Arc::new(Hub::new(HubConfig {
        activation_threshold: config.hub.activation_threshold,
        pool_workers: config.hub.pool_workers,
    }));

    let limiter = config.rate_limit.enabled.then(|| {
        Arc::new(RateLimiter::new(
            config.rate_limit.max_requests,
            Duration::from_secs(config.rate_limit.window_secs),
        ))
    });

    let state = AppState {
        config: config.clone(),
        store,
        hub,
        limiter,
    };

    run_server(state).await
}

/// Run the HTTP/WebSocket server until a termination signal, then drain.
async fn run_server(state: AppState) -> Result<()> {
    let addr = state.config.bind_addr()?;
    let app = router(state.clone());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Parley server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws/{{room-id}}", addr);

    let shutdown = CancellationToken::new();
    let mut server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        })
    };

    tokio::select! {
        result = &mut server => {
            // The listener died on its own; there is nothing to drain.
            result??;
            return Ok(());
        }
        () = shutdown_signal() => {
            info!("shutdown signal received, draining connections");
            shutdown.cancel();
        }
    }

    // Bounded grace period; after it expires the remaining connections are
    // torn down with the process.
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => return Err(err.into()),
        Ok(Err(join_err)) => return Err(join_err.into()),
        Err(_) => {
            warn!("grace period expired, forcing remaining connections closed");
            server.abort();
        }
    }

    state.hub.shutdown().await;
    info!("stopped");
    Ok(())
}

/// Assemble the route tree.
///
/// `/register` and `/health` are public; everything else sits behind the
/// API-key and rate-limit layers (auth outermost, so the limiter sees an
/// identity).
fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/rooms", get(rest::list_rooms).post(rest::create_room))
        .route("/ws/:room_id", get(ws::ws_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            ratelimit::enforce,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/register", post(rest::register))
        .route("/health", get(health_handler))
        .merge(protected)
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
