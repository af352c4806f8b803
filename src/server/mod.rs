//! HTTP server.
//!
//! - REST/JSON bridge at `/api/v1/*` and `/file/*`
//! - streaming chat at `/api/v1/chat/completions`
//! - Connect transport at `/memos.api.v1.<Service>/<Method>`
//! - `/healthz`

use anyhow::Result;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{any, get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub mod middleware;
pub mod routes;
pub mod state;

pub use state::ServerState;

/// Create the main application router
pub fn create_app(state: ServerState) -> Router {
    let cors = state.config.cors.clone();
    let timeout_secs = state.config.server.request_timeout_secs;

    // Layers run bottom-up: logging, then route resolution, then auth
    let bridge = Router::new()
        .route("/api/v1/*rest", any(routes::gateway::handle))
        .route("/file/*rest", any(routes::gateway::handle))
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::route_middleware))
        .layer(from_fn(middleware::logging_middleware));

    let chat = Router::new()
        .route("/api/v1/chat/completions", post(routes::chat::chat_completions))
        .layer(from_fn(middleware::logging_middleware));

    let rest = bridge.merge(chat).layer(middleware::gateway_cors(&cors));

    let connect = Router::new()
        .route("/:service/:method", post(routes::connect::handle))
        .layer(middleware::connect_cors());

    let mut app = Router::new()
        .route("/healthz", get(health_check))
        .merge(rest)
        .merge(connect);

    if timeout_secs > 0 {
        app = app.layer(TimeoutLayer::new(Duration::from_secs(timeout_secs)));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "memos-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Start the HTTP server and run until Ctrl-C
pub async fn start_server(addr: SocketAddr, state: ServerState) -> Result<()> {
    let mode = state.config.server.mode;
    let app = create_app(state);

    info!("Starting memos-gateway on {} ({} mode)", addr, mode.as_str());
    info!("REST bridge at http://{}/api/v1, Connect at http://{}/memos.api.v1.*", addr, addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
