//! Local HTTP listener the desktop shell talks to. Loopback by default;
//! this is an IPC surface, not a public API.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

use crate::context::AppContext;
use crate::shell::ShellResponse;
use crate::types::{CaptureRecord, TurnOutcome, TurnRequest};

pub fn build_router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/capture", post(capture_handler))
        .route("/message", post(message_handler))
        .with_state(context)
}

/// Bind and serve until the process exits.
pub async fn start_daemon(context: Arc<AppContext>) -> anyhow::Result<()> {
    let port = context.config.daemon.port;
    let bind_addr = context.config.daemon.bind.clone();
    let app = build_router(context);

    let ip: std::net::IpAddr = bind_addr
        .parse()
        .unwrap_or_else(|_| std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let addr = std::net::SocketAddr::new(ip, port);
    info!("Shell endpoint listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn status_handler(State(context): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    let status = context.generator.status();
    Json(json!({
        "ready": status.ready,
        "model": status.model,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn capture_handler(
    State(context): State<Arc<AppContext>>,
) -> Json<ShellResponse<CaptureRecord>> {
    Json(context.shell.capture_now().await)
}

async fn message_handler(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<TurnRequest>,
) -> Json<ShellResponse<TurnOutcome>> {
    Json(context.shell.send_message(request).await)
}
