//! Point-of-sale redemption

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use perkgate_domain::Redemption;
use serde::Deserialize;

use super::Caller;
use crate::context::AppContext;
use crate::error::ApiError;
use crate::utils::logging::log_request;

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// Six ASCII digits; format is checked by the service
    pub code: String,
}

/// `POST /v1/redemptions`
pub async fn redeem_code(
    State(ctx): State<Arc<AppContext>>,
    Caller(auth): Caller,
    Json(request): Json<RedeemRequest>,
) -> Result<Json<Redemption>, ApiError> {
    let started = Instant::now();
    let result = async {
        if !auth.role.can_redeem() {
            return Err(ApiError::Forbidden { role: auth.role, action: "redeem codes" });
        }
        let redemption = ctx.service.redeem(&auth.tenant_id, &request.code, &auth.caller).await?;
        Ok(Json(redemption))
    }
    .await;

    log_request("redemptions::redeem", started.elapsed(), &result);
    result
}
