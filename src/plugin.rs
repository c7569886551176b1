//! Hooks the host calls: load, unload, and settings access.
//!
//! Nothing here returns an error to the host. Failures are logged and
//! turned into `false`/`None`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::scheduler::Scheduler;
use crate::service::{LoopStatus, RelayService};
use crate::settings::{SettingsStore, AUTO_START};

pub const PACKAGE_NAME: &str = env!("CARGO_PKG_NAME");
pub const JOB_DESCRIPTION: &str = "Telegram Receiver";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

pub struct Plugin {
    settings: SettingsStore,
    service: Arc<RelayService>,
    scheduler: Arc<Scheduler>,
    job_interval: Duration,
}

impl Plugin {
    pub fn new(
        settings: SettingsStore,
        service: Arc<RelayService>,
        scheduler: Arc<Scheduler>,
        job_interval: Duration,
    ) -> Self {
        Self {
            settings,
            service,
            scheduler,
            job_interval,
        }
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: PACKAGE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Relays Telegram messages between chats".to_string(),
        }
    }

    /// Initialize default settings and start receiving if `auto_start` is on.
    pub async fn load(&self) {
        debug!("{} plugin_load", PACKAGE_NAME);
        if let Err(e) = self.settings.init_defaults().await {
            error!("Failed to initialize settings: {}", e);
            return;
        }

        match self.settings.get(AUTO_START).await {
            Ok(Some(value)) if value == "True" => self.scheduler_start().await,
            Ok(_) => info!("auto_start is off, waiting for a manual start"),
            Err(e) => error!("Failed to read {}: {}", AUTO_START, e),
        }
    }

    pub async fn unload(&self) {
        debug!("{} plugin_unload", PACKAGE_NAME);
        self.scheduler_stop().await;
    }

    /// Register the keep-alive job and start the receive loop now.
    pub async fn scheduler_start(&self) {
        let service = self.service.clone();
        let registered = self
            .scheduler
            .add_interval_job(PACKAGE_NAME, self.job_interval, move || {
                let service = service.clone();
                Box::pin(async move {
                    if let Err(e) = service.start().await {
                        error!("Failed to start receive loop: {}", e);
                    }
                })
            })
            .await;
        match registered {
            Ok(true) => info!("Registered job '{}'", JOB_DESCRIPTION),
            Ok(false) => debug!("Job '{}' already registered", JOB_DESCRIPTION),
            Err(e) => error!("Failed to register job: {:#}", e),
        }

        if let Err(e) = self.service.start().await {
            error!("Failed to start receive loop: {}", e);
        }
    }

    /// Drop the keep-alive job and stop the receive loop.
    pub async fn scheduler_stop(&self) {
        if self.scheduler.contains(PACKAGE_NAME).await {
            if let Err(e) = self.scheduler.remove_job(PACKAGE_NAME).await {
                error!("Failed to remove job: {:#}", e);
            }
        }
        self.service.stop().await;
    }

    pub async fn status(&self) -> LoopStatus {
        self.service.status().await
    }

    pub async fn setting_value(&self, key: &str) -> Option<String> {
        match self.settings.get(key).await {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to read setting '{}': {}", key, e);
                None
            }
        }
    }

    pub async fn settings(&self) -> Option<std::collections::BTreeMap<String, String>> {
        match self.settings.all().await {
            Ok(all) => Some(all),
            Err(e) => {
                error!("Failed to read settings: {}", e);
                None
            }
        }
    }

    /// Overwrite the given settings. Returns `false` if nothing was saved.
    pub async fn save_settings<'a, I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        match self.settings.save(values).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save settings: {}", e);
                false
            }
        }
    }
}
