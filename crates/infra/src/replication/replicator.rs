//! Asynchronous replication between the two stores.
//!
//! The resilient store enqueues a [`ReplicationTask`] for every write one
//! backend accepted. Copies of primary writes go through a bounded queue:
//! enqueueing never waits, and when the queue is full the task is dropped,
//! logged and counted. Application retries transient failures with backoff
//! and is never coupled to the circuit breakers; a copy that still fails is
//! logged and dropped, never surfaced to the caller that caused it.
//!
//! Writes the mirror accepted while the primary was unavailable are held in a
//! [`ReconcileBacklog`] instead and retried on every reconcile tick until the
//! primary answers them, so they outlive the outage that produced them.
//!
//! Lifecycle follows the usual worker rules: the join handle is tracked,
//! cancellation is explicit and interrupts in-flight work, and `stop` waits
//! for the loop with a timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use perkgate_common::resilience::policies::PredicateRetry;
use perkgate_common::resilience::{BackoffStrategy, Jitter, RetryConfig, RetryExecutor, RetryPolicy};
use perkgate_core::{BackendAdapter, WriteCondition, WriteOutcome};
use perkgate_domain::{BackendError, BackendKind, ReplicationSettings, TenantId, ValidationCode};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::backlog::ReconcileBacklog;
use super::errors::ReplicationError;

/// Which way a write travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationDirection {
    /// Copy of a primary write, applied as an upsert
    PrimaryToMirror,
    /// Write accepted by the mirror while the primary was unavailable
    MirrorToPrimary,
}

impl ReplicationDirection {
    pub fn target(&self) -> BackendKind {
        match self {
            ReplicationDirection::PrimaryToMirror => BackendKind::Mirror,
            ReplicationDirection::MirrorToPrimary => BackendKind::Primary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationDirection::PrimaryToMirror => "primary_to_mirror",
            ReplicationDirection::MirrorToPrimary => "mirror_to_primary",
        }
    }
}

/// One logical write to replay on the other backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTask {
    pub direction: ReplicationDirection,
    pub tenant_id: TenantId,
    pub record: ValidationCode,
    pub condition: WriteCondition,
}

impl ReplicationTask {
    /// Mirror copy of a record the primary accepted
    ///
    /// Always an upsert; mirror upserts never clear `used_at`.
    pub fn mirror_copy(tenant_id: TenantId, record: ValidationCode) -> Self {
        Self {
            direction: ReplicationDirection::PrimaryToMirror,
            tenant_id,
            record,
            condition: WriteCondition::Unconditional,
        }
    }

    /// Reconcile a degraded-mode write back onto the primary
    ///
    /// Keeps the original condition so the primary re-checks it: issued codes
    /// must still be unique there, redemptions must still find the row unused.
    pub fn reconcile(tenant_id: TenantId, record: ValidationCode, condition: WriteCondition) -> Self {
        Self { direction: ReplicationDirection::MirrorToPrimary, tenant_id, record, condition }
    }
}

/// Counters for queue and apply outcomes
#[derive(Debug, Default)]
pub struct ReplicationStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    applied: AtomicU64,
    conflicts: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`ReplicationStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub applied: u64,
    /// Conditional replays the target rejected
    pub conflicts: u64,
    pub failed: u64,
    /// Mirror writes still waiting for the primary
    pub pending: u64,
}

impl ReplicationStats {
    fn snapshot(&self, backlog: &ReconcileBacklog) -> ReplicationStatsSnapshot {
        ReplicationStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            applied: self.applied.load(Ordering::Acquire),
            conflicts: self.conflicts.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            pending: backlog.len() as u64,
        }
    }
}

/// Sending half handed to the resilient store
#[derive(Debug, Clone)]
pub struct ReplicationQueue {
    sender: mpsc::Sender<ReplicationTask>,
    backlog: Arc<ReconcileBacklog>,
    stats: Arc<ReplicationStats>,
}

impl ReplicationQueue {
    /// Hand a task over without waiting; returns false if it was dropped
    ///
    /// Mirror-to-primary tasks go to the backlog and are never dropped.
    pub fn enqueue(&self, task: ReplicationTask) -> bool {
        if task.direction == ReplicationDirection::MirrorToPrimary {
            debug!(code_id = %task.record.id, "Holding mirror write for the primary");
            self.backlog.hold(task);
            return true;
        }

        match self.sender.try_send(task) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(task)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    direction = task.direction.as_str(),
                    tenant_id = %task.tenant_id,
                    code_id = %task.record.id,
                    "Replication queue full, dropping task"
                );
                false
            }
            Err(TrySendError::Closed(task)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    direction = task.direction.as_str(),
                    code_id = %task.record.id,
                    "Replication queue closed, dropping task"
                );
                false
            }
        }
    }

    /// Writes held for the primary
    pub fn backlog(&self) -> &ReconcileBacklog {
        &self.backlog
    }

    pub fn stats(&self) -> ReplicationStatsSnapshot {
        self.stats.snapshot(&self.backlog)
    }
}

/// Configuration for the replicator.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Bounded queue size
    pub queue_capacity: usize,
    /// Retry budget per mirror copy
    pub retry: RetryConfig,
    /// Upper bound on one apply attempt
    pub call_timeout: Duration,
    /// Pause between passes over the reconcile backlog
    pub reconcile_interval: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self::from_settings(&ReplicationSettings::default(), Duration::from_secs(4))
    }
}

impl ReplicatorConfig {
    pub fn from_settings(settings: &ReplicationSettings, call_timeout: Duration) -> Self {
        let retry = RetryConfig {
            max_attempts: settings.max_attempts.max(1),
            backoff: BackoffStrategy::Exponential {
                initial_delay: settings.initial_backoff,
                base: 2.0,
                max_delay: settings.max_backoff,
            },
            jitter: Jitter::Equal,
        };

        Self {
            queue_capacity: settings.queue_capacity.max(1),
            retry,
            call_timeout,
            reconcile_interval: settings.reconcile_interval.max(Duration::from_millis(1)),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// The two apply targets
#[derive(Clone)]
struct Targets {
    primary: Arc<dyn BackendAdapter>,
    mirror: Arc<dyn BackendAdapter>,
}

impl Targets {
    fn get(&self, kind: BackendKind) -> &Arc<dyn BackendAdapter> {
        match kind {
            BackendKind::Primary => &self.primary,
            BackendKind::Mirror => &self.mirror,
        }
    }
}

/// State shared by the apply loop
struct Worker {
    targets: Targets,
    config: ReplicatorConfig,
    backlog: Arc<ReconcileBacklog>,
    stats: Arc<ReplicationStats>,
}

/// Background replicator with explicit lifecycle management.
pub struct Replicator {
    targets: Targets,
    config: ReplicatorConfig,
    receiver: Option<mpsc::Receiver<ReplicationTask>>,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<mpsc::Receiver<ReplicationTask>>>,
    backlog: Arc<ReconcileBacklog>,
    stats: Arc<ReplicationStats>,
}

impl Replicator {
    /// Create a stopped replicator and the queue that feeds it.
    pub fn new(
        primary: Arc<dyn BackendAdapter>,
        mirror: Arc<dyn BackendAdapter>,
        config: ReplicatorConfig,
    ) -> (Self, ReplicationQueue) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let backlog = Arc::new(ReconcileBacklog::new());
        let stats = Arc::new(ReplicationStats::default());
        let queue = ReplicationQueue {
            sender,
            backlog: Arc::clone(&backlog),
            stats: Arc::clone(&stats),
        };

        let replicator = Self {
            targets: Targets { primary, mirror },
            config,
            receiver: Some(receiver),
            cancellation: CancellationToken::new(),
            task_handle: None,
            backlog,
            stats,
        };
        (replicator, queue)
    }

    /// Start the worker, spawning the background apply loop.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<(), ReplicationError> {
        if self.is_running() {
            return Err(ReplicationError::AlreadyRunning);
        }
        let receiver = self.receiver.take().ok_or(ReplicationError::QueueLost)?;

        info!(pending = self.backlog.len(), "Starting replicator");

        // Create fresh cancellation token
        self.cancellation = CancellationToken::new();

        let worker = Worker {
            targets: self.targets.clone(),
            config: self.config.clone(),
            backlog: Arc::clone(&self.backlog),
            stats: Arc::clone(&self.stats),
        };
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move { worker.process_loop(receiver, cancel).await });

        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait for the apply loop to finish.
    ///
    /// A mirror copy interrupted mid-apply is dropped and counted. Tasks
    /// still queued stay queued, and held reconciliations stay held; both
    /// are applied after a later `start`.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), ReplicationError> {
        let Some(handle) = self.task_handle.take() else {
            return Err(ReplicationError::NotRunning);
        };

        info!("Stopping replicator");
        self.cancellation.cancel();

        match tokio::time::timeout(self.config.join_timeout, handle).await {
            Ok(Ok(receiver)) => {
                self.receiver = Some(receiver);
            }
            Ok(Err(e)) => {
                warn!("Replicator task panicked: {}", e);
                return Err(ReplicationError::TaskPanicked(e.to_string()));
            }
            Err(_) => {
                warn!("Replicator task did not complete within timeout");
                return Err(ReplicationError::JoinTimeout(self.config.join_timeout));
            }
        }

        info!(pending = self.backlog.len(), "Replicator stopped");
        Ok(())
    }

    /// Returns true while the apply loop is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    pub fn stats(&self) -> ReplicationStatsSnapshot {
        self.stats.snapshot(&self.backlog)
    }
}

impl Worker {
    async fn process_loop(
        self,
        mut receiver: mpsc::Receiver<ReplicationTask>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ReplicationTask> {
        let executor = RetryExecutor::new(
            self.config.retry.clone(),
            PredicateRetry::new(|err: &BackendError, _attempt: u32| err.is_transient()),
        );
        let mut reconcile = tokio::time::interval(self.config.reconcile_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut queue_open = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Replicator loop cancelled");
                    break;
                }
                _ = reconcile.tick() => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            debug!("Reconcile pass interrupted by shutdown");
                            break;
                        }
                        () = self.drain_backlog() => {}
                    }
                }
                next = receiver.recv(), if queue_open => match next {
                    Some(task) => {
                        let code_id = task.record.id;
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => {
                                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                                warn!(%code_id, "Mirror copy interrupted by shutdown, dropping");
                                break;
                            }
                            () = self.apply(&executor, task) => {}
                        }
                    }
                    None => {
                        // The backlog still needs draining
                        debug!("Replication queue closed");
                        queue_open = false;
                    }
                }
            }
        }
        receiver
    }

    async fn put_with_timeout(
        &self,
        target: &Arc<dyn BackendAdapter>,
        task: &ReplicationTask,
    ) -> Result<WriteOutcome, BackendError> {
        let call_timeout = self.config.call_timeout;
        match tokio::time::timeout(
            call_timeout,
            target.put_conditional(&task.tenant_id, &task.record, task.condition),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(call_timeout)),
        }
    }

    /// One pass over the backlog, stopping at the first transient failure
    async fn drain_backlog(&self) {
        let primary = self.targets.get(BackendKind::Primary);

        for held in self.backlog.snapshot() {
            let task = &held.task;
            let code_id = task.record.id;
            match self.put_with_timeout(primary, task).await {
                Ok(WriteOutcome::Applied) => {
                    if !self.backlog.settle(&code_id, held.revision) {
                        // Replaced meanwhile; the insert is done, only the
                        // newer write remains
                        self.backlog.insert_applied(&code_id);
                    }
                    self.stats.applied.fetch_add(1, Ordering::Relaxed);
                    info!(%code_id, tenant_id = %task.tenant_id, "Reconciled mirror write onto primary");
                }
                Ok(WriteOutcome::Rejected) => {
                    self.backlog.settle(&code_id, held.revision);
                    self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                    let condition = task.condition;
                    warn!(
                        %code_id,
                        tenant_id = %task.tenant_id,
                        ?condition,
                        "Primary rejected reconciled write, records diverge"
                    );
                }
                Err(err) if err.is_transient() => {
                    debug!(
                        pending = self.backlog.len(),
                        error = %err,
                        "Primary still unreachable, holding reconciliation"
                    );
                    return;
                }
                Err(err) => {
                    self.backlog.settle(&code_id, held.revision);
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        %code_id,
                        tenant_id = %task.tenant_id,
                        error = %err,
                        "Reconciliation failed permanently, giving up"
                    );
                }
            }
        }
    }

    async fn apply<P>(&self, executor: &RetryExecutor<P>, task: ReplicationTask)
    where
        P: RetryPolicy<BackendError>,
    {
        let target_kind = task.direction.target();
        let target = self.targets.get(target_kind);
        let task_ref = &task;

        let result = executor
            .execute(|attempt| async move {
                let outcome = self.put_with_timeout(target, task_ref).await;
                if let Err(err) = &outcome {
                    warn!(
                        direction = task_ref.direction.as_str(),
                        code_id = %task_ref.record.id,
                        attempt,
                        error = %err,
                        "Replication attempt failed"
                    );
                }
                outcome
            })
            .await;

        match result {
            Ok((WriteOutcome::Applied, attempts)) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                debug!(
                    direction = task.direction.as_str(),
                    target = %target_kind,
                    code_id = %task.record.id,
                    attempts,
                    "Replicated write"
                );
            }
            Ok((WriteOutcome::Rejected, _)) => {
                self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                let condition = task.condition;
                warn!(
                    direction = task.direction.as_str(),
                    tenant_id = %task.tenant_id,
                    code_id = %task.record.id,
                    ?condition,
                    "Replicated write rejected by target, records diverge"
                );
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                let attempts = err.attempts();
                error!(
                    direction = task.direction.as_str(),
                    tenant_id = %task.tenant_id,
                    code_id = %task.record.id,
                    attempts,
                    error = %err.into_inner(),
                    "Replication failed, giving up"
                );
            }
        }
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("Replicator dropped while running; cancelling task");
            self.cancellation.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use perkgate_core::{CodeFilter, CodeKey};
    use perkgate_domain::{CodeId, PartnerId, StudentId};

    use super::*;
    use crate::documents::MemoryDocumentStore;

    /// Fails transiently a fixed number of times before delegating
    struct Flaky {
        inner: MemoryDocumentStore,
        failures_left: Mutex<u32>,
        permanent: bool,
        delay: Duration,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryDocumentStore::new(),
                failures_left: Mutex::new(failures),
                permanent: false,
                delay: Duration::ZERO,
            }
        }

        fn recover(&self) {
            *self.failures_left.lock() = 0;
        }
    }

    #[async_trait]
    impl BackendAdapter for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn get(
            &self,
            tenant_id: &TenantId,
            key: &CodeKey,
        ) -> Result<Option<ValidationCode>, BackendError> {
            self.inner.get(tenant_id, key).await
        }

        async fn put_conditional(
            &self,
            tenant_id: &TenantId,
            record: &ValidationCode,
            condition: WriteCondition,
        ) -> Result<WriteOutcome, BackendError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.permanent {
                return Err(BackendError::Corrupt("bad row".into()));
            }
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(BackendError::Unavailable("connection refused".into()));
                }
            }
            self.inner.put_conditional(tenant_id, record, condition).await
        }

        async fn query(
            &self,
            tenant_id: &TenantId,
            filter: &CodeFilter,
        ) -> Result<Vec<ValidationCode>, BackendError> {
            self.inner.query(tenant_id, filter).await
        }

        async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, BackendError> {
            self.inner.purge_expired(before).await
        }
    }

    fn record() -> ValidationCode {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        ValidationCode {
            id: CodeId::generate(),
            tenant_id: TenantId::new("T1"),
            student_id: StudentId::new("S1"),
            partner_id: PartnerId::new("P1"),
            code_digest: "d".into(),
            issued_at: t0,
            expires_at: t0 + chrono::Duration::seconds(180),
            used_at: None,
        }
    }

    fn fast_config(capacity: usize) -> ReplicatorConfig {
        let settings = ReplicationSettings {
            queue_capacity: capacity,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            reconcile_interval: Duration::from_millis(5),
        };
        ReplicatorConfig::from_settings(&settings, Duration::from_millis(200))
    }

    async fn wait_for(replicator: &Replicator, done: impl Fn(&ReplicationStatsSnapshot) -> bool) {
        for _ in 0..200 {
            if done(&replicator.stats()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("replication did not settle: {:?}", replicator.stats());
    }

    /// Validates retry of transient failures.
    ///
    /// Assertions:
    /// - Two transient failures followed by success count as one applied task
    /// - The mirror holds the record afterwards
    #[tokio::test]
    async fn transient_failures_are_retried_until_applied() {
        let primary: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        let mirror = Arc::new(Flaky::new(2));
        let (mut replicator, queue) =
            Replicator::new(primary, Arc::clone(&mirror) as Arc<dyn BackendAdapter>, fast_config(8));
        replicator.start().unwrap();

        let rec = record();
        assert!(queue.enqueue(ReplicationTask::mirror_copy(rec.tenant_id.clone(), rec.clone())));
        wait_for(&replicator, |s| s.applied == 1).await;

        let copied = mirror.inner.get(&rec.tenant_id, &CodeKey::Id(rec.id)).await.unwrap();
        assert_eq!(copied, Some(rec));
        replicator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_budget_is_counted_as_failed() {
        let primary: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        let mirror: Arc<dyn BackendAdapter> = Arc::new(Flaky::new(10));
        let (mut replicator, queue) = Replicator::new(primary, mirror, fast_config(8));
        replicator.start().unwrap();

        let rec = record();
        queue.enqueue(ReplicationTask::mirror_copy(rec.tenant_id.clone(), rec));
        wait_for(&replicator, |s| s.failed == 1).await;
        assert_eq!(replicator.stats().applied, 0);
        replicator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        let primary: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        let mirror = Arc::new(Flaky { permanent: true, ..Flaky::new(0) });
        let (mut replicator, queue) =
            Replicator::new(primary, mirror as Arc<dyn BackendAdapter>, fast_config(8));
        replicator.start().unwrap();

        let rec = record();
        queue.enqueue(ReplicationTask::mirror_copy(rec.tenant_id.clone(), rec));
        wait_for(&replicator, |s| s.failed == 1).await;
        replicator.stop().await.unwrap();
    }

    /// Validates reverse reconciliation keeps the compare-and-set.
    ///
    /// Assertions:
    /// - A redemption replayed onto a primary row that is already used is
    ///   counted as a conflict and does not overwrite `used_at`
    #[tokio::test]
    async fn reconcile_redemption_conflict_is_counted() {
        let primary = Arc::new(MemoryDocumentStore::new());
        let mirror: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        let rec = record();
        let first_use = rec.redeemed_at(rec.issued_at + chrono::Duration::seconds(1));
        primary.put_conditional(&rec.tenant_id, &first_use, WriteCondition::Unconditional).await.unwrap();

        let (mut replicator, queue) =
            Replicator::new(Arc::clone(&primary) as Arc<dyn BackendAdapter>, mirror, fast_config(8));
        replicator.start().unwrap();

        let second_use = rec.redeemed_at(rec.issued_at + chrono::Duration::seconds(9));
        queue.enqueue(ReplicationTask::reconcile(
            rec.tenant_id.clone(),
            second_use,
            WriteCondition::StillUnused,
        ));
        wait_for(&replicator, |s| s.conflicts == 1).await;

        let stored = primary.get(&rec.tenant_id, &CodeKey::Id(rec.id)).await.unwrap().unwrap();
        assert_eq!(stored.used_at, first_use.used_at);
        replicator.stop().await.unwrap();
    }

    /// Validates that reconciliation outlives a primary outage.
    ///
    /// Assertions:
    /// - While the primary keeps failing the redemption stays held, neither
    ///   applied nor counted as failed
    /// - Once the primary answers, the held CAS lands and the backlog empties
    #[tokio::test]
    async fn held_reconciliation_waits_for_primary() {
        let primary = Arc::new(Flaky::new(u32::MAX));
        let mirror: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        let rec = record();
        primary.inner.put_conditional(&rec.tenant_id, &rec, WriteCondition::Unconditional).await.unwrap();

        let (mut replicator, queue) =
            Replicator::new(Arc::clone(&primary) as Arc<dyn BackendAdapter>, mirror, fast_config(8));
        replicator.start().unwrap();

        let used = rec.redeemed_at(rec.issued_at + chrono::Duration::seconds(3));
        assert!(queue.enqueue(ReplicationTask::reconcile(
            rec.tenant_id.clone(),
            used.clone(),
            WriteCondition::StillUnused,
        )));

        // Many reconcile ticks with the primary down
        tokio::time::sleep(Duration::from_millis(60)).await;
        let stats = replicator.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.applied, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(queue.backlog().pending_use(&rec.tenant_id, &rec.id), used.used_at);

        primary.recover();
        wait_for(&replicator, |s| s.applied == 1 && s.pending == 0).await;
        let stored = primary.inner.get(&rec.tenant_id, &CodeKey::Id(rec.id)).await.unwrap().unwrap();
        assert_eq!(stored.used_at, used.used_at);
        replicator.stop().await.unwrap();
    }

    /// Validates that shutdown does not wait for a slow apply.
    ///
    /// Assertions:
    /// - `stop` returns well within the join timeout while a copy is in flight
    /// - The interrupted copy is counted as dropped
    #[tokio::test]
    async fn stop_interrupts_in_flight_apply() {
        let primary: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        let mirror = Arc::new(Flaky { delay: Duration::from_secs(3), ..Flaky::new(0) });
        let mut config = fast_config(8);
        config.call_timeout = Duration::from_secs(5);
        config.join_timeout = Duration::from_secs(1);
        let (mut replicator, queue) =
            Replicator::new(primary, mirror as Arc<dyn BackendAdapter>, config);
        replicator.start().unwrap();

        let rec = record();
        queue.enqueue(ReplicationTask::mirror_copy(rec.tenant_id.clone(), rec));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let started = std::time::Instant::now();
        replicator.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(replicator.stats().dropped, 1);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let primary: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        let mirror: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        // Not started, so nothing drains the queue
        let (replicator, queue) = Replicator::new(primary, mirror, fast_config(1));

        let rec = record();
        assert!(queue.enqueue(ReplicationTask::mirror_copy(rec.tenant_id.clone(), rec.clone())));
        assert!(!queue.enqueue(ReplicationTask::mirror_copy(rec.tenant_id.clone(), rec)));

        let stats = replicator.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn lifecycle_errors_and_restart() {
        let primary: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        let mirror: Arc<dyn BackendAdapter> = Arc::new(MemoryDocumentStore::new());
        let (mut replicator, queue) = Replicator::new(primary, mirror, fast_config(8));

        assert!(matches!(replicator.stop().await, Err(ReplicationError::NotRunning)));
        replicator.start().unwrap();
        assert!(matches!(replicator.start(), Err(ReplicationError::AlreadyRunning)));
        replicator.stop().await.unwrap();
        assert!(!replicator.is_running());

        // Queue survives a restart
        let rec = record();
        queue.enqueue(ReplicationTask::mirror_copy(rec.tenant_id.clone(), rec));
        replicator.start().unwrap();
        wait_for(&replicator, |s| s.applied == 1).await;
        replicator.stop().await.unwrap();
    }
}
