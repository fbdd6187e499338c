//! SQLite-backed implementation of the backend adapter port.
//!
//! This is the relational mirror. Every call runs on the blocking pool with a
//! pooled connection; conditional writes are enforced by SQL rather than by a
//! read in application code:
//!
//! - `NoLiveDuplicate` runs inside a `BEGIN IMMEDIATE` transaction, so the
//!   duplicate check and the insert hold the write lock together.
//! - `StillUnused` is a single `UPDATE ... WHERE used_at IS NULL`; the changed
//!   row count is the compare-and-set result.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use perkgate_core::{BackendAdapter, CodeFilter, CodeKey, WriteCondition, WriteOutcome};
use perkgate_domain::{BackendError, CodeId, PartnerId, StudentId, TenantId, ValidationCode};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, ToSql, TransactionBehavior,
};
use tokio::task;
use tracing::debug;

use super::manager::DbManager;
use crate::errors::{map_join_error, InfraError};

const SELECT_COLUMNS: &str = "id, tenant_id, student_id, partner_id, code_digest, issued_at, expires_at, used_at";

const UPSERT_SQL: &str = "INSERT INTO validation_codes (id, tenant_id, student_id, partner_id, code_digest, issued_at, expires_at, used_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(id) DO UPDATE SET
         student_id = excluded.student_id,
         partner_id = excluded.partner_id,
         code_digest = excluded.code_digest,
         issued_at = excluded.issued_at,
         expires_at = excluded.expires_at,
         used_at = COALESCE(validation_codes.used_at, excluded.used_at)";

const INSERT_SQL: &str = "INSERT INTO validation_codes (id, tenant_id, student_id, partner_id, code_digest, issued_at, expires_at, used_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const LIVE_DUPLICATE_SQL: &str = "SELECT EXISTS (
         SELECT 1 FROM validation_codes
         WHERE tenant_id = ?1
           AND (id = ?2 OR (code_digest = ?3 AND used_at IS NULL AND expires_at > ?4))
     )";

const MARK_USED_SQL: &str =
    "UPDATE validation_codes SET used_at = ?1 WHERE tenant_id = ?2 AND id = ?3 AND used_at IS NULL";

const PURGE_SQL: &str = "DELETE FROM validation_codes WHERE expires_at < ?1";

/// SQLite relational store for validation codes.
pub struct SqliteCodeRepository {
    db: Arc<DbManager>,
}

impl SqliteCodeRepository {
    /// Construct a repository backed by the shared manager.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, InfraError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<T, InfraError> {
            let mut conn = db.get_connection()?;
            work(&mut *conn)
        })
        .await
        .map_err(map_join_error)?
        .map_err(BackendError::from)
    }

    fn select_one(
        conn: &Connection,
        tenant_id: &TenantId,
        key: &CodeKey,
    ) -> Result<Option<ValidationCode>, InfraError> {
        let raw = match key {
            CodeKey::Id(id) => conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM validation_codes WHERE tenant_id = ?1 AND id = ?2"
                    ),
                    params![tenant_id.as_str(), id.to_string()],
                    map_code_row,
                )
                .optional()?,
            CodeKey::Digest(digest) => conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM validation_codes
                         WHERE tenant_id = ?1 AND code_digest = ?2
                         ORDER BY issued_at DESC, id DESC LIMIT 1"
                    ),
                    params![tenant_id.as_str(), digest],
                    map_code_row,
                )
                .optional()?,
        };
        raw.map(CodeRow::into_code).transpose()
    }

    fn select_filtered(
        conn: &Connection,
        tenant_id: &TenantId,
        filter: &CodeFilter,
    ) -> Result<Vec<ValidationCode>, InfraError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM validation_codes
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR student_id = ?2)
               AND (?3 IS NULL OR partner_id = ?3)
               AND (?4 IS NULL OR (used_at IS NULL AND expires_at > ?4))
             ORDER BY issued_at DESC"
        ))?;
        let rows = stmt.query_map(
            params![
                tenant_id.as_str(),
                filter.student_id.as_ref().map(StudentId::as_str),
                filter.partner_id.as_ref().map(PartnerId::as_str),
                filter.live_at.map(to_millis),
            ],
            map_code_row,
        )?;

        let mut codes = Vec::new();
        for row in rows {
            codes.push(row?.into_code()?);
        }
        Ok(codes)
    }

    fn insert_if_no_live_duplicate(
        conn: &mut Connection,
        record: &ValidationCode,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome, InfraError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let duplicate: bool = tx.query_row(
            LIVE_DUPLICATE_SQL,
            params![
                record.tenant_id.as_str(),
                record.id.to_string(),
                record.code_digest,
                to_millis(now)
            ],
            |row| row.get(0),
        )?;
        if duplicate {
            return Ok(WriteOutcome::Rejected);
        }
        tx.execute(INSERT_SQL, params_from_iter(record_params(record)))?;
        tx.commit()?;
        Ok(WriteOutcome::Applied)
    }

    fn set_used_if_null(
        conn: &Connection,
        tenant_id: &TenantId,
        record: &ValidationCode,
    ) -> Result<WriteOutcome, InfraError> {
        let used_at = record.used_at.ok_or_else(|| {
            BackendError::Internal("conditional redemption write without used_at".into())
        })?;
        let changed = conn.execute(
            MARK_USED_SQL,
            params![to_millis(used_at), tenant_id.as_str(), record.id.to_string()],
        )?;
        Ok(if changed == 1 { WriteOutcome::Applied } else { WriteOutcome::Rejected })
    }
}

#[async_trait]
impl BackendAdapter for SqliteCodeRepository {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        key: &CodeKey,
    ) -> Result<Option<ValidationCode>, BackendError> {
        let tenant = tenant_id.clone();
        let key = key.clone();
        self.blocking(move |conn| Self::select_one(conn, &tenant, &key)).await
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
        let tenant = tenant_id.clone();
        let record = record.clone();

        let outcome = self
            .blocking(move |conn| match condition {
                WriteCondition::Unconditional => {
                    conn.execute(UPSERT_SQL, params_from_iter(record_params(&record)))?;
                    Ok(WriteOutcome::Applied)
                }
                WriteCondition::NoLiveDuplicate { now } => {
                    Self::insert_if_no_live_duplicate(conn, &record, now)
                }
                WriteCondition::StillUnused => Self::set_used_if_null(conn, &tenant, &record),
            })
            .await?;

        debug!(backend = "sqlite", ?condition, ?outcome, "Conditional write finished");
        Ok(outcome)
    }

    async fn query(
        &self,
        tenant_id: &TenantId,
        filter: &CodeFilter,
    ) -> Result<Vec<ValidationCode>, BackendError> {
        let tenant = tenant_id.clone();
        let filter = filter.clone();
        self.blocking(move |conn| Self::select_filtered(conn, &tenant, &filter)).await
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, BackendError> {
        self.blocking(move |conn| {
            let removed = conn.execute(PURGE_SQL, params![to_millis(before)])?;
            Ok(u64::try_from(removed).unwrap_or(u64::MAX))
        })
        .await
    }
}

/// Row exactly as stored, before domain decoding
struct CodeRow {
    id: String,
    tenant_id: String,
    student_id: String,
    partner_id: String,
    code_digest: String,
    issued_at: i64,
    expires_at: i64,
    used_at: Option<i64>,
}

impl CodeRow {
    fn into_code(self) -> Result<ValidationCode, InfraError> {
        let id = self
            .id
            .parse::<CodeId>()
            .map_err(|err| BackendError::Corrupt(format!("invalid code id {}: {err}", self.id)))?;

        Ok(ValidationCode {
            id,
            tenant_id: TenantId::new(self.tenant_id),
            student_id: StudentId::new(self.student_id),
            partner_id: PartnerId::new(self.partner_id),
            code_digest: self.code_digest,
            issued_at: from_millis(self.issued_at, "issued_at")?,
            expires_at: from_millis(self.expires_at, "expires_at")?,
            used_at: self.used_at.map(|ms| from_millis(ms, "used_at")).transpose()?,
        })
    }
}

fn map_code_row(row: &Row<'_>) -> rusqlite::Result<CodeRow> {
    Ok(CodeRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        student_id: row.get(2)?,
        partner_id: row.get(3)?,
        code_digest: row.get(4)?,
        issued_at: row.get(5)?,
        expires_at: row.get(6)?,
        used_at: row.get(7)?,
    })
}

fn record_params(record: &ValidationCode) -> Vec<Box<dyn ToSql>> {
    vec![
        Box::new(record.id.to_string()),
        Box::new(record.tenant_id.as_str().to_string()),
        Box::new(record.student_id.as_str().to_string()),
        Box::new(record.partner_id.as_str().to_string()),
        Box::new(record.code_digest.clone()),
        Box::new(to_millis(record.issued_at)),
        Box::new(to_millis(record.expires_at)),
        Box::new(record.used_at.map(to_millis)),
    ]
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64, column: &str) -> Result<DateTime<Utc>, BackendError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| BackendError::Corrupt(format!("{column} out of range: {ms}")))
}
