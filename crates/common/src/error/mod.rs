//! Common error types and classification utilities
//!
//! This module provides the error-handling vocabulary shared by every perkgate
//! crate:
//!
//! 1. **`CommonError`**: failures raised by the shared building blocks
//!    themselves. Today that is only invalid configuration of a breaker,
//!    retry policy or hasher; runtime faults belong to the domain errors.
//!
//! 2. **`ErrorClassification` trait**: a uniform way to ask any error whether
//!    it is retryable, how severe it is, and whether it deserves a page.
//!
//! 3. **`ErrorSeverity` enum**: the severity scale used in structured logs.
//!
//! ## Composition
//!
//! Crate-specific errors compose with `CommonError` instead of duplicating its
//! variants:
//!
//! ```rust,ignore
//! #[derive(Debug, Error)]
//! pub enum AdapterError {
//!     #[error("row could not be decoded: {0}")]
//!     Corrupt(String),
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//! ```
//!
//! ## Severity levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected, caller-caused outcomes | Code not found, code already used |
//! | **Warning** | Degraded but operational | Breaker open, transient timeouts |
//! | **Error** | Failure requiring attention | Both backends unavailable, bad config |
//! | **Critical** | System integrity at risk | Corrupt rows, invariant violations |

use std::fmt;
use std::time::Duration;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Errors raised by the shared building blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A component was given an invalid setting
    Config { message: String, field: String },
}

impl CommonError {
    /// Configuration error attributed to a named field.
    pub fn config_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: field.into() }
    }
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => {
                write!(f, "Configuration error in field '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for CommonError {}

/// Uniform classification interface implemented by every public error type.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again: timeouts, connectivity loss, open circuits.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_display_includes_field() {
        let err = CommonError::config_field("breaker.failure_threshold", "must be > 0");
        assert_eq!(
            err.to_string(),
            "Configuration error in field 'breaker.failure_threshold': must be > 0"
        );
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert!(!err.is_critical());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_severity_labels_are_ordered() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
    }
}
