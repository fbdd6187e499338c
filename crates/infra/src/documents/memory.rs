//! Process-local document store
//!
//! One map of documents per tenant. A tenant's map is only touched while its
//! `DashMap` shard is write-locked, which makes every conditional write atomic
//! with respect to other writers in the same tenant.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use perkgate_core::{BackendAdapter, CodeFilter, CodeKey, WriteCondition, WriteOutcome};
use perkgate_domain::{BackendError, CodeId, TenantId, ValidationCode};

/// In-memory document store, used for development and as a test backend
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    tenants: DashMap<TenantId, HashMap<CodeId, ValidationCode>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents across all tenants
    pub fn len(&self) -> usize {
        self.tenants.iter().map(|tenant| tenant.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn latest_by_digest<'a>(
        documents: impl Iterator<Item = &'a ValidationCode>,
        digest: &str,
    ) -> Option<&'a ValidationCode> {
        documents
            .filter(|doc| doc.code_digest == digest)
            .max_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)))
    }
}

#[async_trait]
impl BackendAdapter for MemoryDocumentStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        key: &CodeKey,
    ) -> Result<Option<ValidationCode>, BackendError> {
        let Some(documents) = self.tenants.get(tenant_id) else {
            return Ok(None);
        };
        let found = match key {
            CodeKey::Id(id) => documents.get(id),
            CodeKey::Digest(digest) => Self::latest_by_digest(documents.values(), digest),
        };
        Ok(found.cloned())
    }

    async fn put_conditional(
        &self,
        tenant_id: &TenantId,
        record: &ValidationCode,
        condition: WriteCondition,
    ) -> Result<WriteOutcome, BackendError> {
        if &record.tenant_id != tenant_id {
            return Err(BackendError::Internal("record tenant does not match call scope".into()));
        }
        let mut documents = self.tenants.entry(tenant_id.clone()).or_default();

        let outcome = match condition {
            WriteCondition::Unconditional => {
                let mut next = record.clone();
                if let Some(existing) = documents.get(&record.id) {
                    next.used_at = existing.used_at.or(record.used_at);
                }
                documents.insert(record.id, next);
                WriteOutcome::Applied
            }
            WriteCondition::NoLiveDuplicate { now } => {
                let duplicate = documents.contains_key(&record.id)
                    || documents
                        .values()
                        .any(|doc| doc.code_digest == record.code_digest && doc.is_live_at(now));
                if duplicate {
                    WriteOutcome::Rejected
                } else {
                    documents.insert(record.id, record.clone());
                    WriteOutcome::Applied
                }
            }
            WriteCondition::StillUnused => {
                let used_at = record.used_at.ok_or_else(|| {
                    BackendError::Internal("conditional redemption write without used_at".into())
                })?;
                match documents.get_mut(&record.id) {
                    Some(doc) if doc.used_at.is_none() => {
                        doc.used_at = Some(used_at);
                        WriteOutcome::Applied
                    }
                    _ => WriteOutcome::Rejected,
                }
            }
        };
        Ok(outcome)
    }

    async fn query(
        &self,
        tenant_id: &TenantId,
        filter: &CodeFilter,
    ) -> Result<Vec<ValidationCode>, BackendError> {
        let Some(documents) = self.tenants.get(tenant_id) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<ValidationCode> =
            documents.values().filter(|doc| filter.matches(doc)).cloned().collect();
        matched.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(matched)
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, BackendError> {
        let mut removed = 0_u64;
        for mut tenant in self.tenants.iter_mut() {
            let len_before = tenant.len();
            tenant.retain(|_, doc| doc.expires_at >= before);
            removed += (len_before - tenant.len()) as u64;
        }
        Ok(removed)
    }
}
