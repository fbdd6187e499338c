//! HTTP error mapping
//!
//! Caller mistakes become 4xx; storage outages become 503 so clients retry;
//! everything else is a 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use perkgate_common::error::{ErrorClassification, ErrorSeverity};
use perkgate_domain::{RedemptionError, Role};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    /// A required auth header is absent or unparseable
    #[error("missing or invalid header: {0}")]
    Unauthenticated(&'static str),

    #[error("role {role} may not {action}")]
    Forbidden { role: Role, action: &'static str },

    #[error(transparent)]
    Redemption(#[from] RedemptionError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::Redemption(err) => redemption_status(err),
        }
    }

    /// Stable label for logs and response bodies
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::Forbidden { .. } => "forbidden",
            ApiError::Redemption(err) => err.error_code(),
        }
    }
}

fn redemption_status(err: &RedemptionError) -> StatusCode {
    match err {
        RedemptionError::CodeNotFound => StatusCode::NOT_FOUND,
        RedemptionError::CodeExpired => StatusCode::GONE,
        RedemptionError::CodeAlreadyUsed => StatusCode::CONFLICT,
        RedemptionError::MalformedCode => StatusCode::UNPROCESSABLE_ENTITY,
        RedemptionError::EntityInactive | RedemptionError::PartnerNotAuthorized => {
            StatusCode::FORBIDDEN
        }
        RedemptionError::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        RedemptionError::Collaborator(_) => StatusCode::BAD_GATEWAY,
        RedemptionError::CodeGenerationExhausted { .. } | RedemptionError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Redemption(err) = &self {
            match err.severity() {
                ErrorSeverity::Critical | ErrorSeverity::Error => {
                    error!(error = %err, code = err.error_code(), "Request failed")
                }
                ErrorSeverity::Warning => {
                    warn!(error = %err, code = err.error_code(), "Request failed")
                }
                ErrorSeverity::Info => {}
            }
        }

        let body = ErrorBody { error: self.error_code(), message: self.to_string() };
        (status, Json(body)).into_response()
    }
}
