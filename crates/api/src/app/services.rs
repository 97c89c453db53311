use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;

use dirbatch_infra::directory::{DirectoryClient, HttpDirectoryClient, InMemoryDirectory};
use dirbatch_infra::jobs::{
    InMemoryJobStore, JobController, JobStore, QuotaGovernor, QuotaSnapshot, Scheduler,
    SchedulerHandle, SchedulerStats, StatsReader,
};

use crate::config::AppConfig;

/// Everything the handlers need: the controller plus read access to the
/// scheduler and governor for health reporting.
pub struct AppServices {
    pub controller: JobController,
    governor: Arc<QuotaGovernor>,
    stats: StatsReader,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl AppServices {
    /// Wire a store and directory together and start the worker pool.
    pub fn start(
        config: &AppConfig,
        store: Arc<dyn JobStore>,
        directory: Arc<dyn DirectoryClient>,
    ) -> Self {
        let governor = QuotaGovernor::arc(config.quota());
        let controller = JobController::new(store.clone(), directory.clone());
        let handle = Scheduler::new(store, directory, governor.clone(), config.scheduler()).spawn();
        Self {
            controller,
            governor,
            stats: handle.stats_reader(),
            scheduler: Mutex::new(Some(handle)),
        }
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.stats.stats()
    }

    pub fn quota_snapshot(&self) -> QuotaSnapshot {
        self.governor.snapshot()
    }

    /// Stop the worker pool and wait for in-flight tasks to settle.
    pub async fn shutdown(&self) {
        let handle = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

/// Build services from configuration.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let directory: Arc<dyn DirectoryClient> = match config.directory() {
        Some(http) => {
            tracing::info!(base_url = %http.base_url, "using HTTP directory");
            Arc::new(HttpDirectoryClient::new(http).context("failed to build directory client")?)
        }
        None => {
            tracing::warn!("DIRBATCH_DIRECTORY_URL not set; using empty in-memory directory");
            Arc::new(InMemoryDirectory::new())
        }
    };
    let store = build_store(config).await?;
    Ok(AppServices::start(config, store, directory))
}

#[cfg(feature = "postgres")]
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    use dirbatch_infra::jobs::PostgresJobStore;

    if !config.use_postgres {
        let store: Arc<dyn JobStore> = InMemoryJobStore::arc();
        return Ok(store);
    }
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required for the Postgres store")?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections((config.workers as u32).saturating_add(4))
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PostgresJobStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("failed to create job tables")?;
    tracing::info!("using Postgres job store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    if config.use_postgres {
        anyhow::bail!("DIRBATCH_USE_POSTGRES is set but this build lacks the `postgres` feature");
    }
    let store: Arc<dyn JobStore> = InMemoryJobStore::arc();
    Ok(store)
}
