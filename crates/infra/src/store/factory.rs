//! Builds backends and breakers from configuration

use std::sync::Arc;

use perkgate_common::resilience::{CircuitBreaker, CircuitBreakerConfig};
use perkgate_core::BackendAdapter;
use perkgate_domain::{BackendConfig, BackendKind, BreakerSettings};
use tracing::info;

use crate::database::{DbManager, SqliteCodeRepository};
use crate::documents::{MemoryDocumentStore, PostgresDocumentStore};
use crate::errors::{map_join_error, InfraError};

/// Connect the configured backend and make sure its schema exists
pub async fn build_adapter(
    kind: BackendKind,
    config: &BackendConfig,
) -> Result<Arc<dyn BackendAdapter>, InfraError> {
    let adapter: Arc<dyn BackendAdapter> = match config {
        BackendConfig::Memory => Arc::new(MemoryDocumentStore::new()),
        BackendConfig::Postgres { url } => {
            let store = PostgresDocumentStore::connect(url.clone()).await?;
            store.run_migrations().await?;
            Arc::new(store)
        }
        BackendConfig::Sqlite { path, pool_size } => {
            let path = path.clone();
            let pool_size = *pool_size;
            // Pool construction opens connections and blocks
            let manager = tokio::task::spawn_blocking(move || {
                let manager = DbManager::new(&path, pool_size)?;
                manager.run_migrations()?;
                Ok::<_, InfraError>(manager)
            })
            .await
            .map_err(map_join_error)??;
            Arc::new(SqliteCodeRepository::new(Arc::new(manager)))
        }
    };

    info!(backend = %kind, adapter = adapter.name(), "Backend ready");
    Ok(adapter)
}

/// Breaker for one backend using the system clock
pub fn build_breaker(kind: BackendKind, settings: &BreakerSettings) -> Result<CircuitBreaker, InfraError> {
    let config = breaker_config(settings)?;
    Ok(CircuitBreaker::new(kind.as_str(), config)?)
}

pub fn breaker_config(settings: &BreakerSettings) -> Result<CircuitBreakerConfig, InfraError> {
    Ok(CircuitBreakerConfig::builder()
        .failure_threshold(settings.failure_threshold)
        .cooldown(settings.cooldown)
        .half_open_trial_count(settings.half_open_trial_count)
        .build()?)
}
