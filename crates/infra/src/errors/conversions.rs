//! Conversions from external infrastructure errors into domain errors.
//!
//! Every driver error ends up as a [`BackendError`]. The split that matters
//! is transient vs. not: connectivity, busy/locked databases and pool
//! exhaustion become [`BackendError::Unavailable`] and feed the circuit
//! breaker, undecodable rows become [`BackendError::Corrupt`], and the rest
//! is [`BackendError::Internal`].

use perkgate_common::error::CommonError;
use perkgate_domain::{BackendError, RedemptionError};
use r2d2::Error as PoolError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;
use serde_json::Error as JsonError;
use tokio::task::JoinError;
use tokio_postgres::Error as PgError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub BackendError);

impl From<InfraError> for BackendError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<BackendError> for InfraError {
    fn from(value: BackendError) -> Self {
        InfraError(value)
    }
}

/// Collaborator calls report failures as [`RedemptionError::Collaborator`]
impl From<InfraError> for RedemptionError {
    fn from(value: InfraError) -> Self {
        RedemptionError::Collaborator(value.0.to_string())
    }
}

impl std::fmt::Display for InfraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for InfraError {}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoBackendError {
    fn into_backend(self) -> BackendError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → BackendError */
/* -------------------------------------------------------------------------- */

impl IntoBackendError for SqlError {
    fn into_backend(self) -> BackendError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match err.code {
                    ErrorCode::DatabaseBusy => BackendError::Unavailable("database is busy".into()),
                    ErrorCode::DatabaseLocked => {
                        BackendError::Unavailable("database is locked".into())
                    }
                    ErrorCode::CannotOpen => {
                        BackendError::Unavailable(format!("cannot open database: {message}"))
                    }
                    ErrorCode::SystemIoFailure | ErrorCode::DiskFull => {
                        BackendError::Unavailable(format!("sqlite I/O failure: {message}"))
                    }
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                        BackendError::Corrupt(format!("sqlite file unreadable: {message}"))
                    }
                    _ => BackendError::Internal(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::FromSqlConversionFailure(_, _, cause) => {
                BackendError::Corrupt(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                BackendError::Corrupt(format!("invalid column type for {name}: {ty}"))
            }
            RE::Utf8Error(..) => BackendError::Corrupt("invalid UTF-8 returned from sqlite".into()),
            other => BackendError::Internal(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_backend())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → BackendError */
/* -------------------------------------------------------------------------- */

impl IntoBackendError for PoolError {
    fn into_backend(self) -> BackendError {
        // The only r2d2 failure is a checkout that timed out
        BackendError::Unavailable(format!("connection pool exhausted: {self}"))
    }
}

impl From<PoolError> for InfraError {
    fn from(value: PoolError) -> Self {
        InfraError(value.into_backend())
    }
}

/* -------------------------------------------------------------------------- */
/* tokio_postgres::Error → BackendError */
/* -------------------------------------------------------------------------- */

/// SQLSTATE classes that mean the server cannot take work right now
///
/// 08: connection exception, 53: insufficient resources, 57P: operator
/// intervention (shutdown, cannot connect now).
pub(crate) fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("53") || code.starts_with("57P")
}

impl IntoBackendError for PgError {
    fn into_backend(self) -> BackendError {
        if self.is_closed() {
            return BackendError::Unavailable("postgres connection closed".into());
        }

        if let Some(state) = self.code() {
            let code = state.code();
            return if is_transient_sqlstate(code) {
                BackendError::Unavailable(format!("postgres unavailable ({code}): {self}"))
            } else {
                BackendError::Internal(format!("postgres error ({code}): {self}"))
            };
        }

        let io_failure = std::error::Error::source(&self)
            .and_then(|source| source.downcast_ref::<std::io::Error>())
            .is_some();
        if io_failure {
            BackendError::Unavailable(format!("postgres connection failure: {self}"))
        } else {
            BackendError::Internal(self.to_string())
        }
    }
}

impl From<PgError> for InfraError {
    fn from(value: PgError) -> Self {
        InfraError(value.into_backend())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → BackendError */
/* -------------------------------------------------------------------------- */

impl IntoBackendError for JsonError {
    fn into_backend(self) -> BackendError {
        BackendError::Corrupt(format!("document does not decode: {self}"))
    }
}

impl From<JsonError> for InfraError {
    fn from(value: JsonError) -> Self {
        InfraError(value.into_backend())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → BackendError */
/* -------------------------------------------------------------------------- */

impl IntoBackendError for HttpError {
    fn into_backend(self) -> BackendError {
        if self.is_timeout() {
            return BackendError::Unavailable("HTTP request timed out".into());
        }

        if self.is_connect() {
            return BackendError::Unavailable("HTTP connection failure".into());
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                429 | 502..=504 => BackendError::Unavailable(message),
                _ => BackendError::Internal(message),
            };
        }

        if self.is_decode() {
            return BackendError::Corrupt(format!("unexpected response body: {self}"));
        }

        BackendError::Internal(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_backend())
    }
}

/* -------------------------------------------------------------------------- */
/* CommonError → BackendError */
/* -------------------------------------------------------------------------- */

/// Only raised while wiring components from an invalid configuration
impl From<CommonError> for InfraError {
    fn from(value: CommonError) -> Self {
        InfraError(BackendError::Internal(value.to_string()))
    }
}

/// Map a failed `spawn_blocking` join into a backend error
pub fn map_join_error(err: JoinError) -> BackendError {
    if err.is_cancelled() {
        BackendError::Internal("blocking task cancelled".into())
    } else {
        BackendError::Internal(format!("blocking task panicked: {err}"))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
