//! Small JSON API for reading and editing the plugin settings.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::plugin::{Plugin, PluginInfo};
use crate::service::LoopStatus;

#[derive(Debug, Serialize, PartialEq)]
pub struct OkResponse {
    ok: bool,
}

async fn get_info(State(plugin): State<Arc<Plugin>>) -> Json<PluginInfo> {
    Json(plugin.info())
}

async fn get_settings(
    State(plugin): State<Arc<Plugin>>,
) -> Result<Json<BTreeMap<String, String>>, StatusCode> {
    plugin
        .settings()
        .await
        .map(Json)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn save_settings(
    State(plugin): State<Arc<Plugin>>,
    Json(body): Json<HashMap<String, String>>,
) -> Json<OkResponse> {
    let ok = plugin
        .save_settings(body.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .await;
    Json(OkResponse { ok })
}

async fn get_status(State(plugin): State<Arc<Plugin>>) -> Json<LoopStatus> {
    Json(plugin.status().await)
}

async fn start(State(plugin): State<Arc<Plugin>>) -> Json<OkResponse> {
    plugin.scheduler_start().await;
    Json(OkResponse {
        ok: plugin.status().await.running,
    })
}

async fn stop(State(plugin): State<Arc<Plugin>>) -> Json<OkResponse> {
    plugin.scheduler_stop().await;
    Json(OkResponse { ok: true })
}

pub fn router(plugin: Arc<Plugin>) -> Router {
    Router::new()
        .route("/api/info", get(get_info))
        .route("/api/settings", get(get_settings).post(save_settings))
        .route("/api/status", get(get_status))
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .with_state(plugin)
}

/// Serve the settings API on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, plugin: Arc<Plugin>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Settings API listening on http://{}", addr);

    axum::serve(listener, router(plugin))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;
    Ok(())
}
