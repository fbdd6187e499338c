//! Shared test helpers for `perkgate-core` integration tests.
//!
//! In-process fakes for every port the code service consumes, so tests
//! exercise the service's own rules without any backend.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use perkgate_common::resilience::MockClock;
use perkgate_core::{
    CodeFilter, CodeGenerator, CodeHasher, CodeKey, CodeStore, Consistency, EntityStatus,
    PartnerScope, Served, ValidationCodeService, WriteCondition, WriteOutcome,
};
use perkgate_domain::{
    BackendKind, CallerIdentity, HealthMode, PartnerId, RedemptionError, StoreError, StudentId,
    TenantId, ValidationCode,
};

/// Fixed start of every scenario
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).single().expect("valid timestamp")
}

/// Code store whose conditional writes are atomic under one lock
#[derive(Default)]
pub struct FakeCodeStore {
    rows: Mutex<Vec<ValidationCode>>,
    degraded: Mutex<bool>,
    write_consistency: Mutex<Vec<Consistency>>,
    pub rejected_writes: AtomicU32,
    pub cas_attempts: AtomicU32,
}

impl FakeCodeStore {
    pub fn rows(&self) -> Vec<ValidationCode> {
        self.rows.lock().clone()
    }

    /// Consistency requested by every write so far
    pub fn write_consistency(&self) -> Vec<Consistency> {
        self.write_consistency.lock().clone()
    }

    pub fn set_degraded(&self, degraded: bool) {
        *self.degraded.lock() = degraded;
    }
}

#[async_trait]
impl CodeStore for FakeCodeStore {
    async fn read(
        &self,
        tenant_id: &TenantId,
        key: &CodeKey,
        _consistency: Consistency,
    ) -> Result<Served<Option<ValidationCode>>, StoreError> {
        let rows = self.rows.lock();
        let found = rows
            .iter()
            .filter(|row| &row.tenant_id == tenant_id)
            .filter(|row| match key {
                CodeKey::Id(id) => &row.id == id,
                CodeKey::Digest(digest) => &row.code_digest == digest,
            })
            .max_by_key(|row| row.issued_at)
            .cloned();
        Ok(Served::new(found, BackendKind::Primary))
    }

    async fn write(
        &self,
        tenant_id: &TenantId,
        record: &ValidationCode,
        condition: WriteCondition,
        consistency: Consistency,
    ) -> Result<Served<WriteOutcome>, StoreError> {
        self.write_consistency.lock().push(consistency);
        let mut rows = self.rows.lock();
        if let WriteCondition::NoLiveDuplicate { now } = condition {
            let clash = rows.iter().any(|row| {
                &row.tenant_id == tenant_id
                    && row.code_digest == record.code_digest
                    && row.is_live_at(now)
            });
            if clash {
                self.rejected_writes.fetch_add(1, Ordering::SeqCst);
                return Ok(Served::new(WriteOutcome::Rejected, BackendKind::Primary));
            }
        }
        rows.retain(|row| row.id != record.id);
        rows.push(record.clone());
        Ok(Served::new(WriteOutcome::Applied, BackendKind::Primary))
    }

    async fn mark_used(
        &self,
        tenant_id: &TenantId,
        record: &ValidationCode,
        used_at: DateTime<Utc>,
        _pinned: BackendKind,
    ) -> Result<WriteOutcome, StoreError> {
        self.cas_attempts.fetch_add(1, Ordering::SeqCst);
        // Give racing tasks a chance to interleave between read and CAS.
        tokio::task::yield_now().await;
        let mut rows = self.rows.lock();
        match rows
            .iter_mut()
            .find(|row| &row.tenant_id == tenant_id && row.id == record.id && row.used_at.is_none())
        {
            Some(row) => {
                row.used_at = Some(used_at);
                Ok(WriteOutcome::Applied)
            }
            None => Ok(WriteOutcome::Rejected),
        }
    }

    async fn query_filtered(
        &self,
        tenant_id: &TenantId,
        filter: &CodeFilter,
        _consistency: Consistency,
    ) -> Result<Served<Vec<ValidationCode>>, StoreError> {
        let rows = self.rows.lock();
        let matched = rows
            .iter()
            .filter(|row| &row.tenant_id == tenant_id && filter.matches(row))
            .cloned()
            .collect();
        Ok(Served::new(matched, BackendKind::Primary))
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock();
        let len = rows.len();
        rows.retain(|row| row.expires_at >= before);
        Ok((len - rows.len()) as u64)
    }

    fn current_mode(&self) -> HealthMode {
        if *self.degraded.lock() {
            HealthMode::Degraded
        } else {
            HealthMode::Normal
        }
    }
}

/// Entity and partner directory backed by in-memory sets
#[derive(Default)]
pub struct FakeDirectory {
    active: Mutex<HashSet<(String, String)>>,
    grants: Mutex<HashSet<(String, String, String)>>,
}

impl FakeDirectory {
    pub fn activate(&self, tenant: &str, entity: &str) -> &Self {
        self.active.lock().insert((tenant.into(), entity.into()));
        self
    }

    pub fn deactivate(&self, tenant: &str, entity: &str) -> &Self {
        self.active.lock().remove(&(tenant.into(), entity.into()));
        self
    }

    pub fn grant(&self, tenant: &str, partner: &str, caller: &str) -> &Self {
        self.grants.lock().insert((tenant.into(), partner.into(), caller.into()));
        self
    }
}

#[async_trait]
impl EntityStatus for FakeDirectory {
    async fn is_active(
        &self,
        tenant_id: &TenantId,
        entity_id: &StudentId,
    ) -> Result<bool, RedemptionError> {
        Ok(self.active.lock().contains(&(tenant_id.to_string(), entity_id.to_string())))
    }
}

#[async_trait]
impl PartnerScope for FakeDirectory {
    async fn partner_authorized(
        &self,
        tenant_id: &TenantId,
        partner_id: &PartnerId,
        caller: &CallerIdentity,
    ) -> Result<bool, RedemptionError> {
        Ok(self.grants.lock().contains(&(
            tenant_id.to_string(),
            partner_id.to_string(),
            caller.to_string(),
        )))
    }
}

/// Hands out scripted codes, then a counter once the script runs out
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<String>>,
    next: AtomicU32,
    pub calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn new<I: IntoIterator<Item = &'static str>>(codes: I) -> Self {
        Self {
            script: Mutex::new(codes.into_iter().map(String::from).collect()),
            next: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn generate(&self) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("{:06}", self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

/// Service wired to fakes, with handles to each fake
pub struct Harness {
    pub service: ValidationCodeService,
    pub store: Arc<FakeCodeStore>,
    pub directory: Arc<FakeDirectory>,
    pub generator: Arc<ScriptedGenerator>,
    pub clock: MockClock,
}

impl Harness {
    /// Tenant `T1`, student `S1` active, caller `pos-1` authorized for `P1`
    pub fn new(generator: ScriptedGenerator) -> Self {
        let store = Arc::new(FakeCodeStore::default());
        let directory = Arc::new(FakeDirectory::default());
        directory.activate("T1", "S1").grant("T1", "P1", "pos-1");
        let generator = Arc::new(generator);
        let clock = MockClock::at_utc(t0());

        let service = ValidationCodeService::new(
            store.clone(),
            directory.clone(),
            directory.clone(),
            generator.clone(),
            CodeHasher::new("test-pepper").expect("pepper"),
            Arc::new(clock.clone()),
        );

        Self { service, store, directory, generator, clock }
    }
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

pub fn pos() -> CallerIdentity {
    CallerIdentity::new("pos-1")
}
