//! Code issuance and listing for students and employees

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use perkgate_domain::{AuthContext, CodeSummary, IssuedCode, PartnerId, StudentId};
use serde::Deserialize;

use super::Caller;
use crate::context::AppContext;
use crate::error::ApiError;
use crate::utils::logging::log_request;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub partner_id: PartnerId,
}

/// The caller is the code holder; only students and employees qualify
fn holder(auth: &AuthContext, action: &'static str) -> Result<StudentId, ApiError> {
    if !auth.role.can_issue() {
        return Err(ApiError::Forbidden { role: auth.role, action });
    }
    Ok(StudentId::new(auth.caller.as_str()))
}

/// `POST /v1/codes`
pub async fn issue_code(
    State(ctx): State<Arc<AppContext>>,
    Caller(auth): Caller,
    Json(request): Json<IssueRequest>,
) -> Result<(StatusCode, Json<IssuedCode>), ApiError> {
    let started = Instant::now();
    let result = async {
        let student_id = holder(&auth, "issue codes")?;
        let issued = ctx.service.issue(&auth.tenant_id, &student_id, &request.partner_id).await?;
        Ok::<_, ApiError>((StatusCode::CREATED, Json(issued)))
    }
    .await;

    log_request("codes::issue", started.elapsed(), &result);
    result
}

/// `GET /v1/codes/active`
pub async fn active_codes(
    State(ctx): State<Arc<AppContext>>,
    Caller(auth): Caller,
) -> Result<Json<Vec<CodeSummary>>, ApiError> {
    let started = Instant::now();
    let result = async {
        let student_id = holder(&auth, "list codes")?;
        let codes = ctx.service.active_codes(&auth.tenant_id, &student_id).await?;
        Ok::<_, ApiError>(Json(codes))
    }
    .await;

    log_request("codes::active", started.elapsed(), &result);
    result
}
