//! HTTP and WebSocket surface.

pub mod docs;
pub mod error;
pub mod routes;
pub mod ws;

use crate::config::Config;
use crate::engine::QueryEngine;
use crate::error::Result;
use crate::refresh::CycleSummary;
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub updates: broadcast::Sender<CycleSummary>,
    pub connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(engine: Arc<QueryEngine>, updates: broadcast::Sender<CycleSummary>) -> Self {
        Self {
            engine,
            updates,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}

fn cors_layer(allowed: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    if allowed.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.engine.config().server.allowed_origins);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/api/v1", get(routes::api_index))
        .route("/api/v1/query", post(routes::query))
        .route("/api/v1/query/status", get(routes::status))
        .route("/api/v1/query/sources", get(routes::sources))
        .route("/api/v1/analyze/sentiment", post(routes::sentiment))
        .route("/ws", get(ws::handler))
        .route("/docs", get(docs::page))
        .route("/openapi.json", get(docs::openapi))
        .fallback(error::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .with_state(state)
}

/// Build the engine, start the refresher and serve until Ctrl-C or SIGTERM.
pub async fn serve(config: Config, run_refresher: bool) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let refresh_enabled = run_refresher && config.refresh.enabled;

    let engine = Arc::new(QueryEngine::from_config(config).await?);
    let (updates, _) = broadcast::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresher = if refresh_enabled {
        Some(engine.refresher().spawn(updates.clone(), shutdown_rx))
    } else {
        info!("background refresh disabled");
        None
    };

    let app = router(AppState::new(engine, updates));
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "LiveMind listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = refresher
        && let Err(e) = handle.await
    {
        warn!(error = %e, "refresher task ended abnormally");
    }
    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
