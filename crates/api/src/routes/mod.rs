//! Route handlers
//!
//! Every `/v1` handler takes a [`Caller`], the auth context asserted by the
//! upstream authentication layer in request headers.

pub mod codes;
pub mod health;
pub mod redemptions;

use std::str::FromStr;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use perkgate_domain::{AuthContext, CallerIdentity, Role, TenantId};

use crate::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ROLE_HEADER: &str = "x-role";
pub const CALLER_HEADER: &str = "x-caller-id";

/// Auth context extracted from request headers
#[derive(Debug, Clone)]
pub struct Caller(pub AuthContext);

fn header<'a>(parts: &'a Parts, name: &'static str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::Unauthenticated(name))
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = TenantId::new(header(parts, TENANT_HEADER)?);
        let role = Role::from_str(header(parts, ROLE_HEADER)?)
            .map_err(|_| ApiError::Unauthenticated(ROLE_HEADER))?;
        let caller = CallerIdentity::new(header(parts, CALLER_HEADER)?);
        Ok(Caller(AuthContext::new(tenant_id, role, caller)))
    }
}
