//! HTTP health endpoints for external uptime watchdogs.

use crate::config::HealthSettings;
use crate::supervisor::StatusHandle;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use helpdesk_core::format_uptime;
use serde_json::{Value, json};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const SERVICE: &str = "helpdesk";

pub(crate) fn router(status: StatusHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(supervisor_status))
        .route("/ping", get(ping))
        .with_state(status)
}

pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind health server on {addr}"))
}

/// Serve the health endpoints until `shutdown` fires.
pub(crate) async fn serve(
    listener: TcpListener,
    status: StatusHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr().context("health server has no local address")?;
    info!(%addr, "health server listening");
    axum::serve(listener, router(status))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("health server server exited unexpectedly")
}

/// Run the health server as its own task. A bind or serve failure is logged and
/// leaves the bot running without it.
pub(crate) fn spawn(
    settings: HealthSettings,
    status: StatusHandle,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = async {
            let listener = bind(settings.bind_addr()?).await?;
            serve(listener, status, shutdown).await
        }
        .await;
        if let Err(failure) = outcome {
            error!(
                bind = %settings.bind,
                error = %format!("{failure:#}"),
                "health server unavailable, bot keeps running"
            );
        }
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "service": SERVICE,
    }))
}

async fn supervisor_status(State(status): State<StatusHandle>) -> Json<Value> {
    let now = Utc::now();
    let snapshot = status.snapshot();
    if snapshot.start_time.is_none() {
        return Json(json!({
            "running": false,
            "uptime": format_uptime(0),
            "restart_count": 0,
            "bot_ready": false,
            "guild_count": 0,
            "error": "not initialized",
            "timestamp": now.to_rfc3339(),
        }));
    }
    Json(json!({
        "running": snapshot.running,
        "uptime": format_uptime(snapshot.uptime_secs(now)),
        "restart_count": snapshot.restart_count,
        "bot_ready": snapshot.ready,
        "guild_count": snapshot.guild_count,
        "timestamp": now.to_rfc3339(),
    }))
}

async fn ping() -> &'static str {
    "pong"
}
