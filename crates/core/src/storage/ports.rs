//! Port interfaces for code storage
//!
//! Two layers meet here. [`BackendAdapter`] is one physical store and knows
//! nothing about failover. [`CodeStore`] is the single logical store the code
//! service talks to; the infra crate implements it over a primary and a
//! mirror adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use perkgate_domain::{
    BackendError, BackendHealth, BackendKind, CodeId, HealthMode, PartnerId, StoreError,
    StudentId, TenantId, ValidationCode,
};

/// How to locate a single record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeKey {
    Id(CodeId),
    /// Most recently issued record with this digest
    ///
    /// Older rows sharing the digest are necessarily dead, because a new
    /// code is only written when no live duplicate exists.
    Digest(String),
}

/// Precondition a backend must check atomically with the write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Insert or update by id. An existing `used_at` is never cleared.
    Unconditional,
    /// Insert only if no live record in the tenant shares the digest
    NoLiveDuplicate { now: DateTime<Utc> },
    /// Set `used_at` on an existing record only if it is still null
    StillUnused,
}

/// Whether a conditional write took effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The precondition did not hold; nothing was written
    Rejected,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Filters for listing records within one tenant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeFilter {
    pub student_id: Option<StudentId>,
    pub partner_id: Option<PartnerId>,
    /// Only records unused and unexpired at this instant
    pub live_at: Option<DateTime<Utc>>,
}

impl CodeFilter {
    pub fn matches(&self, code: &ValidationCode) -> bool {
        self.student_id.as_ref().map_or(true, |s| &code.student_id == s)
            && self.partner_id.as_ref().map_or(true, |p| &code.partner_id == p)
            && self.live_at.map_or(true, |now| code.is_live_at(now))
    }
}

/// Consistency requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// Reads use the mirror only while the primary breaker is OPEN; writes
    /// never leave the primary
    Strict,
    /// Reads and writes use the mirror whenever the primary cannot answer
    Relaxed,
}

/// A value together with the backend that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served<T> {
    pub value: T,
    pub backend: BackendKind,
}

impl<T> Served<T> {
    pub fn new(value: T, backend: BackendKind) -> Self {
        Self { value, backend }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Served<U> {
        Served { value: f(self.value), backend: self.backend }
    }
}

/// Tenant-scoped CRUD over one physical store
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short name for logs, e.g. `postgres` or `sqlite`
    fn name(&self) -> &str;

    async fn get(
        &self,
        tenant_id: &TenantId,
        key: &CodeKey,
    ) -> Result<Option<ValidationCode>, BackendError>;

    /// Write `record` if `condition` holds, checked atomically by the store
    ///
    /// For [`WriteCondition::StillUnused`] only `record.used_at` is written,
    /// and only onto an existing row whose `used_at` is null.
    async fn put_conditional(
        &self,
        tenant_id: &TenantId,
        record: &ValidationCode,
        condition: WriteCondition,
    ) -> Result<WriteOutcome, BackendError>;

    async fn query(
        &self,
        tenant_id: &TenantId,
        filter: &CodeFilter,
    ) -> Result<Vec<ValidationCode>, BackendError>;

    /// Delete records of every tenant that expired before `before`
    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, BackendError>;
}

/// Single logical code store with failover behind it
#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn read(
        &self,
        tenant_id: &TenantId,
        key: &CodeKey,
        consistency: Consistency,
    ) -> Result<Served<Option<ValidationCode>>, StoreError>;

    /// Conditional write; only [`Consistency::Relaxed`] may land on the mirror
    async fn write(
        &self,
        tenant_id: &TenantId,
        record: &ValidationCode,
        condition: WriteCondition,
        consistency: Consistency,
    ) -> Result<Served<WriteOutcome>, StoreError>;

    /// Compare-and-set `used_at` on the backend that served the lookup
    ///
    /// Never re-routed: if `pinned` cannot take the call the result is
    /// [`StoreError::BackendUnavailable`].
    async fn mark_used(
        &self,
        tenant_id: &TenantId,
        record: &ValidationCode,
        used_at: DateTime<Utc>,
        pinned: BackendKind,
    ) -> Result<WriteOutcome, StoreError>;

    async fn query_filtered(
        &self,
        tenant_id: &TenantId,
        filter: &CodeFilter,
        consistency: Consistency,
    ) -> Result<Served<Vec<ValidationCode>>, StoreError>;

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    fn current_mode(&self) -> HealthMode;

    /// Per-backend detail for diagnostics
    fn backend_health(&self) -> Vec<BackendHealth> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn code(student: &str, partner: &str, issued_at: DateTime<Utc>) -> ValidationCode {
        ValidationCode {
            id: CodeId::generate(),
            tenant_id: TenantId::new("T1"),
            student_id: StudentId::new(student),
            partner_id: PartnerId::new(partner),
            code_digest: "d".into(),
            issued_at,
            expires_at: issued_at + Duration::seconds(180),
            used_at: None,
        }
    }

    #[test]
    fn test_filter_combines_all_predicates() {
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let filter = CodeFilter {
            student_id: Some(StudentId::new("S1")),
            partner_id: None,
            live_at: Some(t0 + Duration::seconds(10)),
        };

        assert!(filter.matches(&code("S1", "P1", t0)));
        assert!(!filter.matches(&code("S2", "P1", t0)));
        assert!(!filter.matches(&code("S1", "P1", t0 - Duration::seconds(600))));
        assert!(!filter.matches(&code("S1", "P1", t0).redeemed_at(t0)));
        assert!(CodeFilter::default().matches(&code("S9", "P9", t0)));
    }

    #[test]
    fn test_served_map_keeps_backend() {
        let served = Served::new(2, BackendKind::Mirror).map(|v| v * 21);
        assert_eq!(served, Served::new(42, BackendKind::Mirror));
    }
}
