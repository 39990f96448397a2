//! Wiring from loaded configuration to a ready engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::adapters::github::GitHubCommitFetcher;
use crate::adapters::memory::StorePollingQueue;
use crate::adapters::providers::{build_registry, http_client};
use crate::adapters::sqlite::{database_url, initialize_database, PoolConfig, SqliteExportQueue, SqliteTaskStore};
use crate::domain::models::Config;
use crate::domain::ports::{TaskQueue, TaskStore};
use crate::services::{
    AdmissionPolicy, AnalysisEngine, CircuitBreakerConfig, CircuitBreakerService, EngineComponents,
    EngineSettings, ProviderGateway,
};

/// Engine assembled over the project database, GitHub and the configured
/// providers.
pub struct Runtime {
    pub config: Config,
    pub engine: Arc<AnalysisEngine>,
    pub pool: SqlitePool,
}

impl Runtime {
    pub async fn open(config: Config) -> Result<Self> {
        let url = database_url(&config.database.path);
        let pool = initialize_database(&url, Some(PoolConfig::from(&config.database)))
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;

        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(pool.clone()));
        let queue: Arc<dyn TaskQueue> = Arc::new(StorePollingQueue::new(
            store.clone(),
            Duration::from_millis(config.engine.queue_poll_interval_ms),
        ));

        let http = http_client()?;
        let fetcher = Arc::new(GitHubCommitFetcher::new(http.clone(), &config.data_fetch));
        let registry = build_registry(&config.providers, &http);
        let breaker = CircuitBreakerService::new(CircuitBreakerConfig::from(&config.circuit_breaker));
        let gateway = ProviderGateway::new(registry, config.providers.clone(), breaker);
        let export_queue = Arc::new(SqliteExportQueue::new(pool.clone(), config.export.retention_days));

        let engine = AnalysisEngine::new(
            EngineComponents {
                store,
                queue,
                fetcher,
                gateway,
                export_queue,
                admission: AdmissionPolicy::from(&config.admission),
            },
            EngineSettings::from(&config),
        );
        let swept = engine.recover().await.context("Failed to recover task state")?;
        if swept > 0 {
            info!(swept, "failed tasks left running by stopped workers");
        }
        debug!(database = %config.database.path, "runtime ready");

        Ok(Self { config, engine: Arc::new(engine), pool })
    }
}
