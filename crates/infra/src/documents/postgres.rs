//! PostgreSQL document store
//!
//! Each validation code is kept as a JSONB document. The columns next to the
//! document exist for indexing and for the conditional writes:
//!
//! - `NoLiveDuplicate` runs in a transaction that first takes a transaction
//!   scoped advisory lock on `(tenant_id, code_digest)`, so concurrent
//!   issuers of the same digest serialize across processes.
//! - `StillUnused` is a single `UPDATE ... WHERE used_at IS NULL`.
//!
//! The `used_at` column is authoritative; the copy inside the document is
//! overwritten with it on read.
//!
//! Connection strings may carry credentials and are never logged.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use perkgate_core::{BackendAdapter, CodeFilter, CodeKey, WriteCondition, WriteOutcome};
use perkgate_domain::{BackendError, TenantId, ValidationCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info, warn};

use crate::errors::InfraError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS perkgate_codes (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    code_digest TEXT NOT NULL,
    issued_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    used_at TIMESTAMPTZ,
    document JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS perkgate_codes_digest_idx
    ON perkgate_codes (tenant_id, code_digest, issued_at DESC);
CREATE INDEX IF NOT EXISTS perkgate_codes_expiry_idx
    ON perkgate_codes (expires_at);
";

const SELECT_BY_ID_SQL: &str =
    "SELECT document, used_at FROM perkgate_codes WHERE tenant_id = $1 AND id = $2";

const SELECT_BY_DIGEST_SQL: &str = "SELECT document, used_at FROM perkgate_codes
     WHERE tenant_id = $1 AND code_digest = $2
     ORDER BY issued_at DESC, id DESC LIMIT 1";

const SELECT_FILTERED_SQL: &str = "SELECT document, used_at FROM perkgate_codes
     WHERE tenant_id = $1
       AND ($2::TEXT IS NULL OR document->>'student_id' = $2)
       AND ($3::TEXT IS NULL OR document->>'partner_id' = $3)
       AND ($4::TIMESTAMPTZ IS NULL OR (used_at IS NULL AND expires_at > $4))
     ORDER BY issued_at DESC";

const UPSERT_SQL: &str = "INSERT INTO perkgate_codes (id, tenant_id, code_digest, issued_at, expires_at, used_at, document)
     VALUES ($1, $2, $3, $4, $5, $6, $7)
     ON CONFLICT (id) DO UPDATE SET
         code_digest = EXCLUDED.code_digest,
         issued_at = EXCLUDED.issued_at,
         expires_at = EXCLUDED.expires_at,
         used_at = COALESCE(perkgate_codes.used_at, EXCLUDED.used_at),
         document = EXCLUDED.document";

const LOCK_DIGEST_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

const INSERT_IF_NO_LIVE_SQL: &str = "INSERT INTO perkgate_codes (id, tenant_id, code_digest, issued_at, expires_at, used_at, document)
     SELECT $1::TEXT, $2::TEXT, $3::TEXT, $4::TIMESTAMPTZ, $5::TIMESTAMPTZ, $6::TIMESTAMPTZ, $7::JSONB
     WHERE NOT EXISTS (
         SELECT 1 FROM perkgate_codes
         WHERE tenant_id = $2 AND code_digest = $3 AND used_at IS NULL AND expires_at > $8::TIMESTAMPTZ
     )
     ON CONFLICT (id) DO NOTHING";

const MARK_USED_SQL: &str =
    "UPDATE perkgate_codes SET used_at = $1 WHERE tenant_id = $2 AND id = $3 AND used_at IS NULL";

const PURGE_SQL: &str = "DELETE FROM perkgate_codes WHERE expires_at < $1";

/// PostgreSQL-backed document store
///
/// Holds two connections: a shared one for single-statement calls, which
/// tokio-postgres pipelines, and a dedicated one for issuance transactions.
/// Either is re-established lazily after the server drops it.
pub struct PostgresDocumentStore {
    url: String,
    shared: Mutex<Option<Arc<Client>>>,
    transactional: Mutex<Option<Client>>,
}

impl std::fmt::Debug for PostgresDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDocumentStore").field("url", &"<redacted>").finish()
    }
}

impl PostgresDocumentStore {
    /// Connect and verify the server is reachable
    pub async fn connect(url: impl Into<String>) -> Result<Self, InfraError> {
        let store = Self {
            url: url.into(),
            shared: Mutex::new(None),
            transactional: Mutex::new(None),
        };
        store.shared_client().await?;
        info!("postgres document store connected");
        Ok(store)
    }

    /// Create the table and indexes if missing
    pub async fn run_migrations(&self) -> Result<(), InfraError> {
        let client = self.shared_client().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        Ok(())
    }

    async fn open(url: &str) -> Result<Client, InfraError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "postgres connection terminated");
            }
        });
        Ok(client)
    }

    async fn shared_client(&self) -> Result<Arc<Client>, InfraError> {
        let mut slot = self.shared.lock().await;
        if let Some(client) = slot.as_ref() {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
            debug!("postgres shared connection closed, reconnecting");
        }
        let client = Arc::new(Self::open(&self.url).await?);
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn insert_if_no_live_duplicate(
        &self,
        record: &ValidationCode,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome, InfraError> {
        let mut slot = self.transactional.lock().await;
        if slot.as_ref().map_or(true, Client::is_closed) {
            *slot = Some(Self::open(&self.url).await?);
        }
        let client = slot
            .as_mut()
            .ok_or_else(|| BackendError::Unavailable("postgres connection missing".into()))?;

        let document = serde_json::to_value(record)?;
        let id = record.id.to_string();
        let lock_key = format!("{}:{}", record.tenant_id, record.code_digest);

        let tx = client.transaction().await?;
        tx.execute(LOCK_DIGEST_SQL, &[&lock_key]).await?;
        let inserted = tx
            .execute(
                INSERT_IF_NO_LIVE_SQL,
                &[
                    &id,
                    &record.tenant_id.as_str(),
                    &record.code_digest,
                    &record.issued_at,
                    &record.expires_at,
                    &record.used_at,
                    &document,
                    &now,
                ],
            )
            .await?;
        tx.commit().await?;

        Ok(if inserted == 1 { WriteOutcome::Applied } else { WriteOutcome::Rejected })
    }
}

#[async_trait]
impl BackendAdapter for PostgresDocumentStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        key: &CodeKey,
    ) -> Result<Option<ValidationCode>, BackendError> {
        let client = self.shared_client().await?;
        let row = match key {
            CodeKey::Id(id) => {
                client.query_opt(SELECT_BY_ID_SQL, &[&tenant_id.as_str(), &id.to_string()]).await
            }
            CodeKey::Digest(digest) => {
                client.query_opt(SELECT_BY_DIGEST_SQL, &[&tenant_id.as_str(), digest]).await
            }
        }
        .map_err(InfraError::from)?;

        Ok(row.map(|row| decode_row(&row)).transpose()?)
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

        let outcome = match condition {
            WriteCondition::Unconditional => {
                let client = self.shared_client().await?;
                let document = serde_json::to_value(record).map_err(InfraError::from)?;
                client
                    .execute(
                        UPSERT_SQL,
                        &[
                            &record.id.to_string(),
                            &tenant_id.as_str(),
                            &record.code_digest,
                            &record.issued_at,
                            &record.expires_at,
                            &record.used_at,
                            &document,
                        ],
                    )
                    .await
                    .map_err(InfraError::from)?;
                WriteOutcome::Applied
            }
            WriteCondition::NoLiveDuplicate { now } => {
                self.insert_if_no_live_duplicate(record, now).await?
            }
            WriteCondition::StillUnused => {
                let used_at = record.used_at.ok_or_else(|| {
                    BackendError::Internal("conditional redemption write without used_at".into())
                })?;
                let client = self.shared_client().await?;
                let changed = client
                    .execute(MARK_USED_SQL, &[&used_at, &tenant_id.as_str(), &record.id.to_string()])
                    .await
                    .map_err(InfraError::from)?;
                if changed == 1 {
                    WriteOutcome::Applied
                } else {
                    WriteOutcome::Rejected
                }
            }
        };

        debug!(backend = "postgres", ?condition, ?outcome, "Conditional write finished");
        Ok(outcome)
    }

    async fn query(
        &self,
        tenant_id: &TenantId,
        filter: &CodeFilter,
    ) -> Result<Vec<ValidationCode>, BackendError> {
        let client = self.shared_client().await?;
        let student = filter.student_id.as_ref().map(|s| s.as_str());
        let partner = filter.partner_id.as_ref().map(|p| p.as_str());
        let rows = client
            .query(SELECT_FILTERED_SQL, &[&tenant_id.as_str(), &student, &partner, &filter.live_at])
            .await
            .map_err(InfraError::from)?;

        rows.iter().map(|row| decode_row(row).map_err(BackendError::from)).collect()
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, BackendError> {
        let client = self.shared_client().await?;
        Ok(client.execute(PURGE_SQL, &[&before]).await.map_err(InfraError::from)?)
    }
}

fn decode_row(row: &Row) -> Result<ValidationCode, InfraError> {
    let document: Value = row.try_get(0)?;
    let used_at: Option<DateTime<Utc>> = row.try_get(1)?;
    let mut code: ValidationCode = serde_json::from_value(document)?;
    code.used_at = used_at;
    Ok(code)
}
