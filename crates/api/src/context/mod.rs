//! Application context - dependency injection container

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use perkgate_common::resilience::SystemClock;
use perkgate_core::{
    BackendAdapter, CodeHasher, CodeServiceSettings, RandomCodeGenerator, ValidationCodeService,
};
use perkgate_domain::{BackendConfig, BackendKind, Config};
use perkgate_infra::{
    build_adapter, build_breaker, build_directory, Collaborators, Replicator, ReplicatorConfig,
    ResilientStore,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Bound on opening a backend at startup (fail fast instead of hanging)
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How often expired codes are purged
const PURGE_INTERVAL: Duration = Duration::from_secs(3_600);

/// Application context - holds all services and background tasks
pub struct AppContext {
    pub config: Config,
    pub service: Arc<ValidationCodeService>,
    replicator: Mutex<Replicator>,
    purge_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl AppContext {
    /// Open both backends, start the replicator and the purge task
    pub async fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let primary = open_backend(BackendKind::Primary, &config.primary).await?;
        let mirror = open_backend(BackendKind::Mirror, &config.mirror).await?;

        let (mut replicator, queue) = Replicator::new(
            Arc::clone(&primary),
            Arc::clone(&mirror),
            ReplicatorConfig::from_settings(&config.replication, config.store.backend_timeout),
        );
        replicator.start().context("failed to start replicator")?;

        let store = ResilientStore::new(
            primary,
            build_breaker(BackendKind::Primary, &config.breaker)?,
            mirror,
            build_breaker(BackendKind::Mirror, &config.breaker)?,
            config.store.backend_timeout,
        )
        .with_replication(queue);

        let Collaborators { entities, partners } = build_directory(&config.directory)?;
        let hasher =
            CodeHasher::new(&config.codes.digest_pepper).context("invalid digest pepper")?;

        let service = Arc::new(
            ValidationCodeService::new(
                Arc::new(store),
                entities,
                partners,
                Arc::new(RandomCodeGenerator),
                hasher,
                Arc::new(SystemClock),
            )
            .with_settings(CodeServiceSettings::from(&config.codes)),
        );

        let shutdown = CancellationToken::new();
        let purge_task = spawn_purge_task(
            Arc::clone(&service),
            config.store.purge_retention,
            shutdown.child_token(),
        );

        info!(
            primary = config.primary.kind(),
            mirror = config.mirror.kind(),
            "Application context ready"
        );

        Ok(Self {
            config,
            service,
            replicator: Mutex::new(replicator),
            purge_task: Mutex::new(Some(purge_task)),
            shutdown,
        })
    }

    /// Stop background work; pending replication is drained up to the
    /// replicator's join timeout
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        if let Some(handle) = self.purge_task.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Purge task ended abnormally");
            }
        }

        let mut replicator = self.replicator.lock().await;
        if replicator.is_running() {
            let stats = replicator.stats();
            replicator.stop().await.context("failed to stop replicator")?;
            info!(
                applied = stats.applied,
                conflicts = stats.conflicts,
                failed = stats.failed,
                dropped = stats.dropped,
                "Replicator stopped"
            );
        }
        Ok(())
    }
}

async fn open_backend(kind: BackendKind, config: &BackendConfig) -> Result<Arc<dyn BackendAdapter>> {
    tokio::time::timeout(STARTUP_TIMEOUT, build_adapter(kind, config))
        .await
        .map_err(|_| {
            error!(backend = %kind, timeout_secs = STARTUP_TIMEOUT.as_secs(), "Backend open timed out");
            anyhow!("{kind} backend did not open within {STARTUP_TIMEOUT:?}")
        })?
        .with_context(|| format!("failed to open {kind} backend"))
}

fn spawn_purge_task(
    service: Arc<ValidationCodeService>,
    retention: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + PURGE_INTERVAL;
        let mut ticker = tokio::time::interval_at(start, PURGE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = service.purge_expired(retention).await {
                        warn!(error = %err, "Scheduled purge failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.codes.digest_pepper = "context-test".into();
        config
    }

    #[tokio::test]
    async fn test_context_starts_and_shuts_down() {
        let ctx = AppContext::new(config()).await.unwrap();
        assert!(ctx.replicator.lock().await.is_running());

        ctx.shutdown().await.unwrap();
        assert!(!ctx.replicator.lock().await.is_running());
        assert!(ctx.purge_task.lock().await.is_none());

        // Second shutdown is a no-op
        ctx.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let err = AppContext::new(Config::default()).await.err().unwrap();
        assert!(err.to_string().contains("invalid configuration"));
    }
}
