//! Shared fixtures for infra integration tests
//!
//! A [`Harness`] wires the full stack the way the binary does, but over two
//! in-memory backends wrapped in [`FaultyAdapter`] so tests can cut, slow
//! down or break either side, and with one [`MockClock`] driving the breakers
//! and the code service.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use perkgate_common::resilience::{CircuitBreaker, CircuitBreakerConfig, MockClock};
use perkgate_core::{
    BackendAdapter, CodeFilter, CodeGenerator, CodeHasher, CodeServiceSettings, CodeStore,
    CodeKey, RandomCodeGenerator, ValidationCodeService, WriteCondition, WriteOutcome,
};
use perkgate_domain::{
    BackendError, CallerIdentity, PartnerId, StudentId, TenantId, ValidationCode,
};
use perkgate_infra::replication::{Replicator, ReplicatorConfig, ReplicationStatsSnapshot};
use perkgate_infra::{MemoryDocumentStore, ResilientStore, StaticDirectory};

pub const BACKEND_TIMEOUT: Duration = Duration::from_millis(200);
pub const COOLDOWN: Duration = Duration::from_secs(30);
pub const RECONCILE_INTERVAL: Duration = Duration::from_millis(10);

/// Whether the harness wires a replicator and runs it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replication {
    Off,
    Stopped,
    Running,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

pub fn tenant() -> TenantId {
    TenantId::new("T1")
}

pub fn student() -> StudentId {
    StudentId::new("S1")
}

pub fn partner() -> PartnerId {
    PartnerId::new("P1")
}

pub fn till() -> CallerIdentity {
    CallerIdentity::new("till-1")
}

/// A stored record for tests that talk to the store directly
pub fn record(digest: &str, issued_at: DateTime<Utc>) -> ValidationCode {
    ValidationCode {
        id: perkgate_domain::CodeId::generate(),
        tenant_id: tenant(),
        student_id: student(),
        partner_id: partner(),
        code_digest: digest.to_string(),
        issued_at,
        expires_at: issued_at + chrono::Duration::seconds(180),
        used_at: None,
    }
}

/// How a [`FaultyAdapter`] currently behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Healthy,
    /// Every call fails with a connectivity error
    Down,
    /// Every call sleeps this long before answering
    Slow(Duration),
    /// Every call fails with an undecodable-row error
    Corrupt,
}

/// Memory backend with switchable failure modes
pub struct FaultyAdapter {
    pub inner: MemoryDocumentStore,
    name: &'static str,
    fault: Mutex<Fault>,
    calls: AtomicU64,
}

impl FaultyAdapter {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            name,
            fault: Mutex::new(Fault::Healthy),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set(&self, fault: Fault) {
        *self.fault.lock() = fault;
    }

    /// Calls that reached this adapter, failed or not
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn stored(&self, id: perkgate_domain::CodeId) -> Option<ValidationCode> {
        self.inner.get(&tenant(), &CodeKey::Id(id)).await.unwrap()
    }

    async fn gate(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fault = *self.fault.lock();
        match fault {
            Fault::Healthy => Ok(()),
            Fault::Down => Err(BackendError::Unavailable("connection refused".into())),
            Fault::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Fault::Corrupt => Err(BackendError::Corrupt("bad document".into())),
        }
    }
}

#[async_trait]
impl BackendAdapter for FaultyAdapter {
    fn name(&self) -> &str {
        self.name
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        key: &CodeKey,
    ) -> Result<Option<ValidationCode>, BackendError> {
        self.gate().await?;
        self.inner.get(tenant_id, key).await
    }

    async fn put_conditional(
        &self,
        tenant_id: &TenantId,
        record: &ValidationCode,
        condition: WriteCondition,
    ) -> Result<WriteOutcome, BackendError> {
        self.gate().await?;
        self.inner.put_conditional(tenant_id, record, condition).await
    }

    async fn query(
        &self,
        tenant_id: &TenantId,
        filter: &CodeFilter,
    ) -> Result<Vec<ValidationCode>, BackendError> {
        self.gate().await?;
        self.inner.query(tenant_id, filter).await
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, BackendError> {
        self.gate().await?;
        self.inner.purge_expired(before).await
    }
}

/// Replays a fixed list of codes, then falls back to random ones
#[derive(Default)]
pub struct ScriptedGenerator {
    codes: Mutex<VecDeque<String>>,
}

impl ScriptedGenerator {
    pub fn new(codes: &[&str]) -> Self {
        Self { codes: Mutex::new(codes.iter().map(|c| c.to_string()).collect()) }
    }

    pub fn push(&self, code: &str) {
        self.codes.lock().push_back(code.to_string());
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn generate(&self) -> String {
        self.codes.lock().pop_front().unwrap_or_else(|| RandomCodeGenerator.generate())
    }
}

pub fn breaker(name: &str, clock: &MockClock) -> CircuitBreaker<MockClock> {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(3)
        .cooldown(COOLDOWN)
        .half_open_trial_count(1)
        .build()
        .expect("valid breaker config");
    CircuitBreaker::with_clock(name, config, clock.clone()).expect("breaker")
}

/// The full stack over two faulty memory backends
pub struct Harness {
    pub clock: MockClock,
    pub primary: Arc<FaultyAdapter>,
    pub mirror: Arc<FaultyAdapter>,
    pub store: Arc<ResilientStore<MockClock>>,
    pub generator: Arc<ScriptedGenerator>,
    pub service: ValidationCodeService,
    pub replicator: Option<Replicator>,
}

impl Harness {
    /// Stack without replication
    pub fn new() -> Self {
        Self::build(Replication::Off)
    }

    /// Stack with a running replicator
    pub fn replicated() -> Self {
        Self::build(Replication::Running)
    }

    /// Stack with a replicator that is wired but not started, so held
    /// reconciliations stay held until the test starts it
    pub fn replication_paused() -> Self {
        Self::build(Replication::Stopped)
    }

    fn build(replication: Replication) -> Self {
        let clock = MockClock::at_utc(t0());
        let primary = Arc::new(FaultyAdapter::new("primary-memory"));
        let mirror = Arc::new(FaultyAdapter::new("mirror-memory"));

        let mut store = ResilientStore::new(
            Arc::clone(&primary) as Arc<dyn BackendAdapter>,
            breaker("primary", &clock),
            Arc::clone(&mirror) as Arc<dyn BackendAdapter>,
            breaker("mirror", &clock),
            BACKEND_TIMEOUT,
        );

        let replicator = if replication != Replication::Off {
            let config = ReplicatorConfig::from_settings(
                &perkgate_domain::ReplicationSettings {
                    queue_capacity: 64,
                    max_attempts: 3,
                    initial_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(5),
                    reconcile_interval: RECONCILE_INTERVAL,
                },
                BACKEND_TIMEOUT,
            );
            let (mut replicator, queue) = Replicator::new(
                Arc::clone(&primary) as Arc<dyn BackendAdapter>,
                Arc::clone(&mirror) as Arc<dyn BackendAdapter>,
                config,
            );
            if replication == Replication::Running {
                replicator.start().expect("replicator starts");
            }
            store = store.with_replication(queue);
            Some(replicator)
        } else {
            None
        };
        let store = Arc::new(store);

        let mut directory = StaticDirectory::default();
        directory.activate(&tenant(), &student());
        directory.authorize(&tenant(), &partner(), &till());
        let directory = Arc::new(directory);

        let generator = Arc::new(ScriptedGenerator::default());
        let service = ValidationCodeService::new(
            Arc::clone(&store) as Arc<dyn CodeStore>,
            directory.clone(),
            directory,
            Arc::clone(&generator) as Arc<dyn CodeGenerator>,
            CodeHasher::new("test-pepper").expect("hasher"),
            Arc::new(clock.clone()),
        )
        .with_settings(CodeServiceSettings {
            ttl: Duration::from_secs(180),
            max_generation_attempts: 5,
        });

        Self { clock, primary, mirror, store, generator, service, replicator }
    }

    /// Fail three primary calls so its breaker opens
    pub async fn trip_primary(&self) {
        self.primary.set(Fault::Down);
        for _ in 0..3 {
            let _ = self
                .store
                .read(&tenant(), &CodeKey::Digest("trip".into()), perkgate_core::Consistency::Relaxed)
                .await;
        }
    }

    /// Wait until the replicator has settled at least `applied` tasks
    pub async fn wait_replicated(&self, applied: u64) -> ReplicationStatsSnapshot {
        self.wait_stats(|stats| stats.applied + stats.conflicts + stats.failed >= applied).await
    }

    /// Wait until the replication counters satisfy `done`
    pub async fn wait_stats(
        &self,
        done: impl Fn(&ReplicationStatsSnapshot) -> bool,
    ) -> ReplicationStatsSnapshot {
        let replicator = self.replicator.as_ref().expect("harness built with replication");
        for _ in 0..400 {
            let stats = replicator.stats();
            if done(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("replication did not settle: {:?}", replicator.stats());
    }

    pub fn replication_stats(&self) -> ReplicationStatsSnapshot {
        self.replicator.as_ref().expect("harness built with replication").stats()
    }

    /// Start a replicator built by [`Harness::replication_paused`]
    pub fn start_replicator(&mut self) {
        self.replicator.as_mut().expect("harness built with replication").start().expect("starts");
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
