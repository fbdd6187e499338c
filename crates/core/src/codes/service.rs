//! Validation code service - issuance and exactly-once redemption
//!
//! Built only against [`CodeStore`]; it never sees a concrete backend. The
//! redemption race is settled by the store's conditional write, never by
//! the read that precedes it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use perkgate_common::resilience::Clock;
use perkgate_domain::{
    is_well_formed_code, CallerIdentity, CodeId, CodeSettings, CodeSummary, HealthReport,
    IssuedCode, PartnerId, Redemption, RedemptionError, StudentId, TenantId, ValidationCode,
};
use tracing::{debug, info, instrument, warn};

use super::digest::CodeHasher;
use super::ports::{CodeGenerator, EntityStatus, PartnerScope};
use crate::storage::ports::{CodeFilter, CodeKey, CodeStore, Consistency, WriteCondition};

/// Tunables for the code service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeServiceSettings {
    pub ttl: Duration,
    pub max_generation_attempts: u32,
}

impl Default for CodeServiceSettings {
    fn default() -> Self {
        Self::from(&CodeSettings::default())
    }
}

impl From<&CodeSettings> for CodeServiceSettings {
    fn from(settings: &CodeSettings) -> Self {
        Self { ttl: settings.ttl, max_generation_attempts: settings.max_generation_attempts }
    }
}

/// Issues, lists and redeems short-lived single-use codes
pub struct ValidationCodeService {
    store: Arc<dyn CodeStore>,
    entities: Arc<dyn EntityStatus>,
    partners: Arc<dyn PartnerScope>,
    generator: Arc<dyn CodeGenerator>,
    hasher: CodeHasher,
    clock: Arc<dyn Clock>,
    settings: CodeServiceSettings,
}

impl ValidationCodeService {
    pub fn new(
        store: Arc<dyn CodeStore>,
        entities: Arc<dyn EntityStatus>,
        partners: Arc<dyn PartnerScope>,
        generator: Arc<dyn CodeGenerator>,
        hasher: CodeHasher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            entities,
            partners,
            generator,
            hasher,
            clock,
            settings: CodeServiceSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CodeServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &CodeServiceSettings {
        &self.settings
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.ttl).unwrap_or(chrono::Duration::MAX)
    }

    /// Issue a fresh code for an active student or employee
    ///
    /// A digest collision with another live code in the tenant is rejected by
    /// the store and retried with a new code, up to the configured bound.
    #[instrument(skip_all, fields(tenant = %tenant_id, student = %student_id, partner = %partner_id))]
    pub async fn issue(
        &self,
        tenant_id: &TenantId,
        student_id: &StudentId,
        partner_id: &PartnerId,
    ) -> Result<IssuedCode, RedemptionError> {
        if !self.entities.is_active(tenant_id, student_id).await? {
            debug!("Refusing to issue code for inactive entity");
            return Err(RedemptionError::EntityInactive);
        }

        let attempts = self.settings.max_generation_attempts.max(1);
        for attempt in 1..=attempts {
            let code = self.generator.generate();
            let issued_at = self.now();
            let record = ValidationCode {
                id: CodeId::generate(),
                tenant_id: tenant_id.clone(),
                student_id: student_id.clone(),
                partner_id: partner_id.clone(),
                code_digest: self.hasher.digest(tenant_id, &code),
                issued_at,
                expires_at: issued_at + self.ttl(),
                used_at: None,
            };

            // Uniqueness is only meaningful against the primary; the mirror's
            // copy may be missing live codes
            let served = self
                .store
                .write(
                    tenant_id,
                    &record,
                    WriteCondition::NoLiveDuplicate { now: issued_at },
                    Consistency::Strict,
                )
                .await?;

            if served.value.is_applied() {
                info!(
                    code_id = %record.id,
                    backend = %served.backend,
                    attempt,
                    "Validation code issued"
                );
                return Ok(IssuedCode { code, expires_at: record.expires_at });
            }

            debug!(attempt, "Generated code collides with a live code, regenerating");
        }

        warn!(attempts, "Exhausted code generation attempts");
        Err(RedemptionError::CodeGenerationExhausted { attempts })
    }

    /// Redeem a plaintext code on behalf of a partner caller
    ///
    /// Checks run in a fixed order: format, existence, expiry, prior use,
    /// entity status, partner scope. Only then is the conditional write
    /// attempted, on the same backend that served the lookup.
    #[instrument(skip_all, fields(tenant = %tenant_id, caller = %caller))]
    pub async fn redeem(
        &self,
        tenant_id: &TenantId,
        code: &str,
        caller: &CallerIdentity,
    ) -> Result<Redemption, RedemptionError> {
        if !is_well_formed_code(code) {
            return Err(RedemptionError::MalformedCode);
        }

        let digest = self.hasher.digest(tenant_id, code);
        let served =
            self.store.read(tenant_id, &CodeKey::Digest(digest), Consistency::Strict).await?;
        let backend = served.backend;
        let Some(record) = served.value else {
            return Err(RedemptionError::CodeNotFound);
        };

        let now = self.now();
        if record.is_expired_at(now) {
            debug!(code_id = %record.id, "Code expired");
            return Err(RedemptionError::CodeExpired);
        }
        if record.is_used() {
            debug!(code_id = %record.id, "Code already used");
            return Err(RedemptionError::CodeAlreadyUsed);
        }
        if !self.entities.is_active(tenant_id, &record.student_id).await? {
            return Err(RedemptionError::EntityInactive);
        }
        if !self.partners.partner_authorized(tenant_id, &record.partner_id, caller).await? {
            warn!(code_id = %record.id, partner = %record.partner_id, "Caller not authorized for partner");
            return Err(RedemptionError::PartnerNotAuthorized);
        }

        let outcome = self.store.mark_used(tenant_id, &record, now, backend).await?;
        if !outcome.is_applied() {
            debug!(code_id = %record.id, %backend, "Lost redemption race");
            return Err(RedemptionError::CodeAlreadyUsed);
        }

        info!(code_id = %record.id, %backend, "Validation code redeemed");
        Ok(Redemption { student_id: record.student_id, partner_id: record.partner_id })
    }

    /// Live codes held by a student, newest first
    #[instrument(skip_all, fields(tenant = %tenant_id, student = %student_id))]
    pub async fn active_codes(
        &self,
        tenant_id: &TenantId,
        student_id: &StudentId,
    ) -> Result<Vec<CodeSummary>, RedemptionError> {
        let filter = CodeFilter {
            student_id: Some(student_id.clone()),
            partner_id: None,
            live_at: Some(self.now()),
        };
        let served = self.store.query_filtered(tenant_id, &filter, Consistency::Relaxed).await?;

        let mut codes: Vec<CodeSummary> = served.value.iter().map(CodeSummary::from).collect();
        codes.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(codes)
    }

    /// Remove codes that expired more than `retention` ago
    pub async fn purge_expired(&self, retention: Duration) -> Result<u64, RedemptionError> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = self.now().checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.store.purge_expired(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "Purged expired validation codes");
        }
        Ok(removed)
    }

    /// Current operating mode of the storage layer
    pub fn health(&self) -> HealthReport {
        HealthReport { mode: self.store.current_mode(), backends: self.store.backend_health() }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for ordering of redemption checks; scenario and concurrency
    //! coverage lives in `tests/code_service.rs`.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use perkgate_common::resilience::MockClock;
    use perkgate_domain::{BackendKind, HealthMode, StoreError};

    use super::*;
    use crate::storage::ports::{Served, WriteOutcome};

    struct OneRecordStore {
        record: Mutex<Option<ValidationCode>>,
        cas_calls: Mutex<u32>,
    }

    #[async_trait]
    impl CodeStore for OneRecordStore {
        async fn read(
            &self,
            _tenant_id: &TenantId,
            _key: &CodeKey,
            _consistency: Consistency,
        ) -> Result<Served<Option<ValidationCode>>, StoreError> {
            Ok(Served::new(self.record.lock().unwrap().clone(), BackendKind::Primary))
        }

        async fn write(
            &self,
            _tenant_id: &TenantId,
            record: &ValidationCode,
            _condition: WriteCondition,
            _consistency: Consistency,
        ) -> Result<Served<WriteOutcome>, StoreError> {
            *self.record.lock().unwrap() = Some(record.clone());
            Ok(Served::new(WriteOutcome::Applied, BackendKind::Primary))
        }

        async fn mark_used(
            &self,
            _tenant_id: &TenantId,
            _record: &ValidationCode,
            _used_at: DateTime<Utc>,
            _pinned: BackendKind,
        ) -> Result<WriteOutcome, StoreError> {
            *self.cas_calls.lock().unwrap() += 1;
            Ok(WriteOutcome::Applied)
        }

        async fn query_filtered(
            &self,
            _tenant_id: &TenantId,
            _filter: &CodeFilter,
            _consistency: Consistency,
        ) -> Result<Served<Vec<ValidationCode>>, StoreError> {
            Ok(Served::new(Vec::new(), BackendKind::Primary))
        }

        async fn purge_expired(&self, _before: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }

        fn current_mode(&self) -> HealthMode {
            HealthMode::Normal
        }
    }

    struct Flags {
        active: bool,
        authorized: bool,
    }

    #[async_trait]
    impl EntityStatus for Flags {
        async fn is_active(&self, _: &TenantId, _: &StudentId) -> Result<bool, RedemptionError> {
            Ok(self.active)
        }
    }

    #[async_trait]
    impl PartnerScope for Flags {
        async fn partner_authorized(
            &self,
            _: &TenantId,
            _: &PartnerId,
            _: &CallerIdentity,
        ) -> Result<bool, RedemptionError> {
            Ok(self.authorized)
        }
    }

    struct Fixed;

    impl CodeGenerator for Fixed {
        fn generate(&self) -> String {
            "123456".into()
        }
    }

    fn service(store: Arc<OneRecordStore>, flags: Flags) -> ValidationCodeService {
        let flags = Arc::new(flags);
        ValidationCodeService::new(
            store,
            flags.clone(),
            flags,
            Arc::new(Fixed),
            CodeHasher::new("pepper").unwrap(),
            Arc::new(MockClock::new()),
        )
    }

    fn empty_store() -> Arc<OneRecordStore> {
        Arc::new(OneRecordStore { record: Mutex::new(None), cas_calls: Mutex::new(0) })
    }

    #[tokio::test]
    async fn test_malformed_code_never_reaches_store() {
        let store = empty_store();
        let svc = service(store.clone(), Flags { active: true, authorized: true });
        let caller = CallerIdentity::new("pos-1");

        for bad in ["", "12345", "1234567", "12a456"] {
            let err = svc.redeem(&TenantId::new("T1"), bad, &caller).await.unwrap_err();
            assert_eq!(err, RedemptionError::MalformedCode);
        }
    }

    #[tokio::test]
    async fn test_unauthorized_partner_blocks_before_cas() {
        let store = empty_store();
        let tenant = TenantId::new("T1");
        let issuer = service(store.clone(), Flags { active: true, authorized: true });
        issuer.issue(&tenant, &StudentId::new("S1"), &PartnerId::new("P1")).await.unwrap();

        let svc = service(store.clone(), Flags { active: true, authorized: false });
        let err = svc.redeem(&tenant, "123456", &CallerIdentity::new("pos-9")).await.unwrap_err();

        assert_eq!(err, RedemptionError::PartnerNotAuthorized);
        assert_eq!(*store.cas_calls.lock().unwrap(), 0, "CAS must not run for unauthorized callers");
    }

    #[tokio::test]
    async fn test_inactive_entity_cannot_issue() {
        let svc = service(empty_store(), Flags { active: false, authorized: true });
        let err = svc
            .issue(&TenantId::new("T1"), &StudentId::new("S1"), &PartnerId::new("P1"))
            .await
            .unwrap_err();
        assert_eq!(err, RedemptionError::EntityInactive);
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = CodeSettings::default();
        config.ttl = Duration::from_secs(60);
        config.max_generation_attempts = 2;
        let settings = CodeServiceSettings::from(&config);
        assert_eq!(settings.ttl, Duration::from_secs(60));
        assert_eq!(settings.max_generation_attempts, 2);
        assert_eq!(CodeServiceSettings::default().ttl, Duration::from_secs(180));
    }
}
