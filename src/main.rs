mod config;
mod error;
mod platform;
mod plugin;
mod relay;
mod routing;
mod scheduler;
mod service;
mod settings;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::platform::telegram::TelegramBackend;
use crate::plugin::Plugin;
use crate::scheduler::Scheduler;
use crate::service::RelayService;
use crate::settings::SettingsStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("  Database: {}", config.storage.database_path.display());
    info!("  Job interval: {}h", config.scheduler.interval_hours);

    let settings = SettingsStore::open(&config.storage.database_path)
        .context("Failed to open settings database")?;

    let scheduler = Arc::new(Scheduler::new().await?);
    scheduler.start().await?;

    let service = Arc::new(RelayService::new(
        settings.clone(),
        Arc::new(TelegramBackend),
    ));
    let plugin = Arc::new(Plugin::new(
        settings,
        service,
        scheduler.clone(),
        config.scheduler.interval(),
    ));

    plugin.load().await;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let web_task = config.web.listen.map(|addr| {
        let plugin = plugin.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = web::serve(addr, plugin, shutdown).await {
                error!("Settings API failed: {:#}", e);
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down...");

    let _ = shutdown_tx.send(true);
    if let Some(task) = web_task {
        let _ = task.await;
    }

    plugin.unload().await;
    scheduler.shutdown().await?;

    Ok(())
}
