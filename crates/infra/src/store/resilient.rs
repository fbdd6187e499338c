//! Failover facade over the primary and mirror backends
//!
//! Every operation asks the primary's breaker for a permit first. A call the
//! breaker admits is bounded by the backend timeout; its outcome is reported
//! back through the permit. Only transient errors (timeouts, connectivity)
//! count as failures. If the primary refuses or fails transiently the mirror
//! is tried under its own breaker, subject to the consistency level.
//!
//! The mirror decides a redemption only while the primary breaker is OPEN,
//! and takes writes only when a replicator is wired to carry them back to the
//! primary. Until the primary has them, held redemptions are overlaid on
//! everything the primary returns.
//!
//! Writes one backend accepts are handed to the replicator for the other one.
//! Replication is fire-and-forget and never changes the caller's result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use perkgate_common::resilience::{CircuitBreaker, CircuitState, Clock, SystemClock};
use perkgate_core::{
    BackendAdapter, CodeFilter, CodeKey, CodeStore, Consistency, Served, WriteCondition,
    WriteOutcome,
};
use perkgate_domain::{
    BackendError, BackendHealth, BackendKind, HealthMode, StoreError, TenantId, ValidationCode,
};
use tracing::{debug, error, instrument, warn};

use crate::replication::{ReplicationQueue, ReplicationTask};

/// Result of one guarded call against one backend
enum Attempt<T> {
    Served(T),
    /// The breaker did not admit the call
    Refused,
    /// Timeout or connectivity failure, already counted against the breaker
    Transient(BackendError),
    /// The backend answered with an error failover cannot fix
    Fatal(BackendError),
}

/// One backend with the breaker guarding it
struct Guarded<C: Clock> {
    adapter: Arc<dyn BackendAdapter>,
    breaker: CircuitBreaker<C>,
}

/// Resilient code store over a primary and a mirror backend
pub struct ResilientStore<C: Clock = SystemClock> {
    primary: Guarded<C>,
    mirror: Guarded<C>,
    backend_timeout: Duration,
    replication: Option<ReplicationQueue>,
}

impl<C: Clock> std::fmt::Debug for ResilientStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientStore")
            .field("primary", &self.primary.adapter.name())
            .field("mirror", &self.mirror.adapter.name())
            .field("primary_breaker", &self.primary.breaker.state())
            .field("mirror_breaker", &self.mirror.breaker.state())
            .field("backend_timeout", &self.backend_timeout)
            .finish()
    }
}

impl<C: Clock> ResilientStore<C> {
    /// Build the store from its adapters and their breakers
    ///
    /// Breakers are injected so callers control their configuration and
    /// clock; clones of them observe the same state.
    pub fn new(
        primary: Arc<dyn BackendAdapter>,
        primary_breaker: CircuitBreaker<C>,
        mirror: Arc<dyn BackendAdapter>,
        mirror_breaker: CircuitBreaker<C>,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            primary: Guarded { adapter: primary, breaker: primary_breaker },
            mirror: Guarded { adapter: mirror, breaker: mirror_breaker },
            backend_timeout,
            replication: None,
        }
    }

    /// Hand accepted writes to a replicator
    pub fn with_replication(mut self, queue: ReplicationQueue) -> Self {
        self.replication = Some(queue);
        self
    }

    pub fn breaker(&self, kind: BackendKind) -> &CircuitBreaker<C> {
        &self.guarded(kind).breaker
    }

    fn guarded(&self, kind: BackendKind) -> &Guarded<C> {
        match kind {
            BackendKind::Primary => &self.primary,
            BackendKind::Mirror => &self.mirror,
        }
    }

    /// Primary is confirmed down: its breaker is OPEN. HALF_OPEN does not count,
    /// a trial call may be about to close it
    fn primary_open(&self) -> bool {
        self.primary.breaker.state() == CircuitState::Open
    }

    /// The mirror may accept writes only if they can reach the primary later
    fn mirror_writable(&self) -> bool {
        self.replication.is_some()
    }

    /// Redemptions the mirror accepted that the primary has not applied yet
    fn overlay(&self, served: BackendKind, record: &mut ValidationCode) {
        if served == BackendKind::Primary {
            if let Some(queue) = &self.replication {
                queue.backlog().overlay(record);
            }
        }
    }

    fn pending_use(&self, tenant_id: &TenantId, record: &ValidationCode) -> Option<DateTime<Utc>> {
        self.replication.as_ref().and_then(|queue| queue.backlog().pending_use(tenant_id, &record.id))
    }

    async fn attempt<T, F, Fut>(&self, kind: BackendKind, operation: &'static str, call: F) -> Attempt<T>
    where
        F: FnOnce(Arc<dyn BackendAdapter>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let guarded = self.guarded(kind);
        let Some(permit) = guarded.breaker.try_acquire() else {
            debug!(backend = %kind, operation, "Breaker refused call");
            return Attempt::Refused;
        };

        // Dropping this future before it resolves drops the permit unsettled,
        // so a caller that gives up never counts as a backend failure.
        let result =
            match tokio::time::timeout(self.backend_timeout, call(Arc::clone(&guarded.adapter)))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.backend_timeout)),
            };

        match result {
            Ok(value) => {
                permit.succeeded();
                Attempt::Served(value)
            }
            Err(err) if err.is_transient() => {
                permit.failed();
                warn!(
                    backend = %kind,
                    adapter = guarded.adapter.name(),
                    operation,
                    error = %err,
                    "Backend call failed"
                );
                Attempt::Transient(err)
            }
            Err(err) => {
                // The backend answered; its health is not in question
                permit.succeeded();
                error!(
                    backend = %kind,
                    adapter = guarded.adapter.name(),
                    operation,
                    error = %err,
                    "Backend returned a non-transient error"
                );
                Attempt::Fatal(err)
            }
        }
    }

    /// Run a read on the primary, falling back to the mirror when allowed
    async fn read_with_fallback<T, F, Fut>(
        &self,
        operation: &'static str,
        consistency: Consistency,
        call: F,
    ) -> Result<Served<T>, StoreError>
    where
        F: Fn(Arc<dyn BackendAdapter>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        match self.attempt(BackendKind::Primary, operation, &call).await {
            Attempt::Served(value) => return Ok(Served::new(value, BackendKind::Primary)),
            Attempt::Fatal(err) => return Err(err.into()),
            Attempt::Refused | Attempt::Transient(_) => {}
        }

        if consistency == Consistency::Strict && !self.primary_open() {
            // A failure below the threshold, or a trial call in flight, is not
            // enough to trust the mirror
            debug!(operation, "Primary not confirmed down, not serving from mirror");
            return Err(StoreError::unavailable(operation));
        }

        match self.attempt(BackendKind::Mirror, operation, &call).await {
            Attempt::Served(value) => {
                debug!(operation, "Served from mirror");
                Ok(Served::new(value, BackendKind::Mirror))
            }
            Attempt::Fatal(err) => Err(err.into()),
            Attempt::Refused | Attempt::Transient(_) => Err(StoreError::unavailable(operation)),
        }
    }

    fn replicate(&self, task: ReplicationTask) {
        if let Some(queue) = &self.replication {
            queue.enqueue(task);
        }
    }

    /// Schedule the copy of a write accepted by `served_by`
    fn replicate_accepted(
        &self,
        served_by: BackendKind,
        tenant_id: &TenantId,
        record: ValidationCode,
        condition: WriteCondition,
    ) {
        let task = match served_by {
            BackendKind::Primary => ReplicationTask::mirror_copy(tenant_id.clone(), record),
            BackendKind::Mirror => ReplicationTask::reconcile(tenant_id.clone(), record, condition),
        };
        self.replicate(task);
    }

    fn health_of(&self, kind: BackendKind) -> BackendHealth {
        let guarded = self.guarded(kind);
        let snapshot = guarded.breaker.snapshot();
        BackendHealth {
            backend: kind,
            adapter: guarded.adapter.name().to_string(),
            breaker_state: snapshot.state.to_string(),
            consecutive_failures: snapshot.consecutive_failures,
        }
    }
}

#[async_trait]
impl<C: Clock> CodeStore for ResilientStore<C> {
    #[instrument(skip_all, fields(tenant_id = %tenant_id, ?consistency))]
    async fn read(
        &self,
        tenant_id: &TenantId,
        key: &CodeKey,
        consistency: Consistency,
    ) -> Result<Served<Option<ValidationCode>>, StoreError> {
        let mut served = self
            .read_with_fallback("read", consistency, |adapter| async move {
                adapter.get(tenant_id, key).await
            })
            .await?;
        let backend = served.backend;
        if let Some(record) = served.value.as_mut() {
            self.overlay(backend, record);
        }
        Ok(served)
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, code_id = %record.id, ?consistency))]
    async fn write(
        &self,
        tenant_id: &TenantId,
        record: &ValidationCode,
        condition: WriteCondition,
        consistency: Consistency,
    ) -> Result<Served<WriteOutcome>, StoreError> {
        let put = |adapter: Arc<dyn BackendAdapter>| async move {
            adapter.put_conditional(tenant_id, record, condition).await
        };

        let served = match self.attempt(BackendKind::Primary, "write", &put).await {
            Attempt::Served(outcome) => Served::new(outcome, BackendKind::Primary),
            Attempt::Fatal(err) => return Err(err.into()),
            Attempt::Refused | Attempt::Transient(_) => {
                if consistency == Consistency::Strict {
                    debug!(code_id = %record.id, "Primary unavailable for strict write");
                    return Err(StoreError::unavailable("write"));
                }
                if !self.mirror_writable() {
                    warn!(code_id = %record.id, "No replicator to reconcile a mirror write, refusing");
                    return Err(StoreError::unavailable("write"));
                }
                match self.attempt(BackendKind::Mirror, "write", &put).await {
                    Attempt::Served(outcome) => {
                        warn!(code_id = %record.id, "Write accepted by mirror in degraded mode");
                        Served::new(outcome, BackendKind::Mirror)
                    }
                    Attempt::Fatal(err) => return Err(err.into()),
                    Attempt::Refused | Attempt::Transient(_) => {
                        return Err(StoreError::unavailable("write"));
                    }
                }
            }
        };

        if served.value.is_applied() {
            self.replicate_accepted(served.backend, tenant_id, record.clone(), condition);
        }
        Ok(served)
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, code_id = %record.id, backend = %pinned))]
    async fn mark_used(
        &self,
        tenant_id: &TenantId,
        record: &ValidationCode,
        used_at: DateTime<Utc>,
        pinned: BackendKind,
    ) -> Result<WriteOutcome, StoreError> {
        match pinned {
            BackendKind::Mirror if !self.primary_open() => {
                // The primary is on trial or recovered after the lookup
                warn!("Primary no longer confirmed down, refusing mirror redemption");
                return Err(StoreError::unavailable("mark_used"));
            }
            BackendKind::Mirror if !self.mirror_writable() => {
                warn!("No replicator to reconcile a mirror redemption, refusing");
                return Err(StoreError::unavailable("mark_used"));
            }
            BackendKind::Primary if self.pending_use(tenant_id, record).is_some() => {
                debug!("Redemption held for the primary already, rejecting");
                return Ok(WriteOutcome::Rejected);
            }
            _ => {}
        }

        let redeemed = record.redeemed_at(used_at);
        let outcome = match self
            .attempt(pinned, "mark_used", |adapter| {
                let redeemed = &redeemed;
                async move {
                    adapter.put_conditional(tenant_id, redeemed, WriteCondition::StillUnused).await
                }
            })
            .await
        {
            Attempt::Served(outcome) => outcome,
            Attempt::Fatal(err) => return Err(err.into()),
            Attempt::Refused | Attempt::Transient(_) => {
                return Err(StoreError::unavailable("mark_used"));
            }
        };

        if outcome.is_applied() {
            self.replicate_accepted(pinned, tenant_id, redeemed, WriteCondition::StillUnused);
        }
        Ok(outcome)
    }

    #[instrument(skip_all, fields(tenant_id = %tenant_id, ?consistency))]
    async fn query_filtered(
        &self,
        tenant_id: &TenantId,
        filter: &CodeFilter,
        consistency: Consistency,
    ) -> Result<Served<Vec<ValidationCode>>, StoreError> {
        let mut served = self
            .read_with_fallback("query", consistency, |adapter| async move {
                adapter.query(tenant_id, filter).await
            })
            .await?;
        let backend = served.backend;
        for record in served.value.iter_mut() {
            self.overlay(backend, record);
        }
        served.value.retain(|record| filter.matches(record));
        Ok(served)
    }

    #[instrument(skip(self))]
    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0_u64;
        let mut any_served = false;
        let mut fatal = None;

        for kind in [BackendKind::Primary, BackendKind::Mirror] {
            match self
                .attempt(kind, "purge", |adapter| async move { adapter.purge_expired(before).await })
                .await
            {
                Attempt::Served(count) => {
                    any_served = true;
                    removed += count;
                    debug!(backend = %kind, count, "Purged expired codes");
                }
                Attempt::Fatal(err) => fatal = Some(err),
                Attempt::Refused | Attempt::Transient(_) => {}
            }
        }

        if let Some(queue) = &self.replication {
            let pruned = queue.backlog().prune_expired(before);
            if pruned > 0 {
                warn!(pruned, "Dropped held reconciliations for codes past retention");
            }
        }

        match (any_served, fatal) {
            (true, _) => Ok(removed),
            (false, Some(err)) => Err(err.into()),
            (false, None) => Err(StoreError::unavailable("purge")),
        }
    }

    fn current_mode(&self) -> HealthMode {
        if self.primary.breaker.state() != CircuitState::Closed {
            HealthMode::Degraded
        } else {
            HealthMode::Normal
        }
    }

    fn backend_health(&self) -> Vec<BackendHealth> {
        vec![self.health_of(BackendKind::Primary), self.health_of(BackendKind::Mirror)]
    }
}
