//! Writes the mirror accepted that the primary has not seen yet
//!
//! While the primary breaker is OPEN the mirror takes redemptions (and relaxed
//! writes). Those must reach the primary after it recovers, however long the
//! outage lasts, so they are held here rather than in the bounded queue with
//! its small retry budget. The replicator drains the backlog on an interval;
//! an entry leaves only when the primary answers it or it expires out of
//! retention.
//!
//! Until an entry is settled the resilient store overlays it on primary
//! answers, so a code redeemed on the mirror cannot be redeemed again on the
//! primary in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use perkgate_core::WriteCondition;
use perkgate_domain::{CodeId, TenantId, ValidationCode};

use super::replicator::ReplicationTask;

/// A held task and the revision it was stored under
#[derive(Debug, Clone)]
pub struct HeldTask {
    pub revision: u64,
    pub task: ReplicationTask,
}

/// Pending mirror-to-primary writes, one per code
#[derive(Debug, Default)]
pub struct ReconcileBacklog {
    entries: DashMap<CodeId, HeldTask>,
    revisions: AtomicU64,
}

impl ReconcileBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a write for the primary
    ///
    /// A later write for the same code replaces the earlier one. If the
    /// earlier one was the insert itself, the insert condition is kept and
    /// the newer record is inserted in its place.
    pub fn hold(&self, task: ReplicationTask) {
        let revision = self.revisions.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries
            .entry(task.record.id)
            .and_modify(|held| {
                let condition = match held.task.condition {
                    insert @ WriteCondition::NoLiveDuplicate { .. } => insert,
                    _ => task.condition,
                };
                held.task = ReplicationTask { condition, ..task.clone() };
                held.revision = revision;
            })
            .or_insert_with(|| HeldTask { revision, task: task.clone() });
    }

    /// `used_at` of a held redemption for this code, if any
    pub fn pending_use(&self, tenant_id: &TenantId, id: &CodeId) -> Option<DateTime<Utc>> {
        self.entries
            .get(id)
            .filter(|held| &held.task.tenant_id == tenant_id)
            .and_then(|held| held.task.record.used_at)
    }

    /// Apply held redemptions to a record the primary returned
    pub fn overlay(&self, record: &mut ValidationCode) {
        if record.used_at.is_none() {
            record.used_at = self.pending_use(&record.tenant_id, &record.id);
        }
    }

    /// Copy of every held task, oldest revision first
    pub fn snapshot(&self) -> Vec<HeldTask> {
        let mut held: Vec<HeldTask> = self.entries.iter().map(|e| e.value().clone()).collect();
        held.sort_by_key(|h| h.revision);
        held
    }

    /// Remove an entry unless it was replaced after `revision` was read
    pub fn settle(&self, id: &CodeId, revision: u64) -> bool {
        self.entries.remove_if(id, |_, held| held.revision == revision).is_some()
    }

    /// Record that the primary already holds the row
    ///
    /// A held insert that absorbed a later redemption is turned into the
    /// redemption's compare-and-set.
    pub fn insert_applied(&self, id: &CodeId) {
        if let Some(mut held) = self.entries.get_mut(id) {
            if matches!(held.task.condition, WriteCondition::NoLiveDuplicate { .. }) {
                held.task.condition = WriteCondition::StillUnused;
            }
        }
    }

    /// Drop entries for codes that expired before `before`
    pub fn prune_expired(&self, before: DateTime<Utc>) -> usize {
        let len = self.entries.len();
        self.entries.retain(|_, held| held.task.record.expires_at >= before);
        len.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
