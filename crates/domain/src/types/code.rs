//! Validation code records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CodeId, PartnerId, StudentId, TenantId};
use crate::constants::CODE_LENGTH;

/// A short-lived single-use code, as persisted
///
/// Only the digest of the plaintext code is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCode {
    pub id: CodeId,
    pub tenant_id: TenantId,
    pub student_id: StudentId,
    pub partner_id: PartnerId,
    pub code_digest: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl ValidationCode {
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Expiry is inclusive: a code is expired at exactly `expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Unused and unexpired
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used() && !self.is_expired_at(now)
    }

    /// Copy of this record marked as redeemed at `used_at`
    pub fn redeemed_at(&self, used_at: DateTime<Utc>) -> Self {
        Self { used_at: Some(used_at), ..self.clone() }
    }
}

/// Returned to the student on issuance; the only place the plaintext exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Returned to the partner on a successful redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub student_id: StudentId,
    pub partner_id: PartnerId,
}

/// Live code as listed back to its owner, without digest or plaintext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSummary {
    pub id: CodeId,
    pub partner_id: PartnerId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&ValidationCode> for CodeSummary {
    fn from(code: &ValidationCode) -> Self {
        Self {
            id: code.id,
            partner_id: code.partner_id.clone(),
            issued_at: code.issued_at,
            expires_at: code.expires_at,
        }
    }
}

/// Codes travel as exactly six ASCII digits
pub fn is_well_formed_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}
