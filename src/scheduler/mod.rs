use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;
use uuid::Uuid;

/// Wrapper around tokio-cron-scheduler that keeps jobs addressable by name
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Mutex<HashMap<String, Uuid>>,
}

impl Scheduler {
    /// Create a new scheduler
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Whether a job named `name` is registered
    pub async fn contains(&self, name: &str) -> bool {
        self.jobs.lock().await.contains_key(name)
    }

    /// Add a job that runs every `period`. Returns `false` if `name` is
    /// already registered.
    pub async fn add_interval_job<F>(&self, name: &str, period: Duration, task: F) -> Result<bool>
    where
        F: Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static,
    {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(name) {
            return Ok(false);
        }

        let job_name = name.to_string();
        let job = Job::new_repeated_async(period, move |_uuid, _lock| {
            let name = job_name.clone();
            let fut = task();
            Box::pin(async move {
                info!("Running scheduled task: {}", name);
                fut.await;
            })
        })
        .with_context(|| format!("Failed to create job: {}", name))?;

        let id = self
            .inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;
        jobs.insert(name.to_string(), id);

        info!("Scheduled task '{}' every {:?}", name, period);
        Ok(true)
    }

    /// Remove the job named `name`, if any
    pub async fn remove_job(&self, name: &str) -> Result<()> {
        let Some(id) = self.jobs.lock().await.remove(name) else {
            return Ok(());
        };
        self.inner
            .remove(&id)
            .await
            .with_context(|| format!("Failed to remove job: {}", name))?;
        info!("Removed scheduled task '{}'", name);
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&self) -> Result<()> {
        // JobScheduler handles are cheap clones of the same scheduler
        let mut inner = self.inner.clone();
        inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}
