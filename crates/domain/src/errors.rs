//! Error taxonomy shared by every layer
//!
//! Three tiers, each wrapping the one below:
//!
//! - [`BackendError`]: one adapter call against one physical store
//! - [`StoreError`]: the resilient facade after failover was attempted
//! - [`RedemptionError`]: what the code service reports to its caller
//!
//! Only transient backend errors ([`BackendError::is_transient`]) are ever
//! counted against a circuit breaker. Business outcomes such as an already
//! used code never are.

use std::time::Duration;

use perkgate_common::error::{ErrorClassification, ErrorSeverity};
use thiserror::Error;

/// Failure of a single adapter call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The call did not complete within the configured bound
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Connectivity failure: refused, reset, pool exhausted, database locked
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    /// Any other backend-side failure
    #[error("backend error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Timeouts and connectivity failures; the only kinds that feed a breaker
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Timeout(_) | BackendError::Unavailable(_))
    }
}

impl ErrorClassification for BackendError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            BackendError::Timeout(_) | BackendError::Unavailable(_) => ErrorSeverity::Warning,
            BackendError::Internal(_) => ErrorSeverity::Error,
            BackendError::Corrupt(_) => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, BackendError::Corrupt(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Failure of the resilient store as a whole
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Neither backend could serve the call
    #[error("no backend available for {operation}")]
    BackendUnavailable { operation: String },

    /// A backend answered with a non-transient error
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StoreError {
    pub fn unavailable(operation: impl Into<String>) -> Self {
        StoreError::BackendUnavailable { operation: operation.into() }
    }
}

impl ErrorClassification for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::BackendUnavailable { .. } => true,
            StoreError::Backend(err) => err.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            StoreError::BackendUnavailable { .. } => ErrorSeverity::Error,
            StoreError::Backend(err) => err.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, StoreError::Backend(err) if err.is_critical())
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Outcome of an issue or redeem call that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedemptionError {
    #[error("validation code not found")]
    CodeNotFound,

    #[error("validation code expired")]
    CodeExpired,

    #[error("validation code already used")]
    CodeAlreadyUsed,

    #[error("validation code must be exactly six digits")]
    MalformedCode,

    #[error("student or employee is not active")]
    EntityInactive,

    #[error("partner is not authorized for this caller")]
    PartnerNotAuthorized,

    #[error("could not generate a unique code after {attempts} attempts")]
    CodeGenerationExhausted { attempts: u32 },

    #[error("storage backends unavailable")]
    BackendUnavailable,

    /// An external collaborator (entity or partner directory) failed
    #[error("collaborator call failed: {0}")]
    Collaborator(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RedemptionError {
    /// Stable machine-readable label
    pub fn error_code(&self) -> &'static str {
        match self {
            RedemptionError::CodeNotFound => "code_not_found",
            RedemptionError::CodeExpired => "code_expired",
            RedemptionError::CodeAlreadyUsed => "code_already_used",
            RedemptionError::MalformedCode => "malformed_code",
            RedemptionError::EntityInactive => "entity_inactive",
            RedemptionError::PartnerNotAuthorized => "partner_not_authorized",
            RedemptionError::CodeGenerationExhausted { .. } => "code_generation_exhausted",
            RedemptionError::BackendUnavailable => "backend_unavailable",
            RedemptionError::Collaborator(_) => "collaborator_failure",
            RedemptionError::Internal(_) => "internal_error",
        }
    }

    /// Permanent outcomes caused by the request itself
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            RedemptionError::CodeNotFound
                | RedemptionError::CodeExpired
                | RedemptionError::CodeAlreadyUsed
                | RedemptionError::MalformedCode
                | RedemptionError::EntityInactive
                | RedemptionError::PartnerNotAuthorized
        )
    }
}

impl From<StoreError> for RedemptionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::BackendUnavailable { .. } => RedemptionError::BackendUnavailable,
            StoreError::Backend(inner) => RedemptionError::Internal(inner.to_string()),
        }
    }
}

impl ErrorClassification for RedemptionError {
    fn is_retryable(&self) -> bool {
        matches!(self, RedemptionError::BackendUnavailable | RedemptionError::Collaborator(_))
    }

    fn severity(&self) -> ErrorSeverity {
        if self.is_caller_error() {
            return ErrorSeverity::Info;
        }
        match self {
            RedemptionError::Collaborator(_) => ErrorSeverity::Warning,
            RedemptionError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, RedemptionError::Internal(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("missing required setting {0}")]
    Missing(String),

    #[error("invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid { field: field.into(), message: message.into() }
    }
}
