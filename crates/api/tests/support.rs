use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use perkgate_api::{router, AppContext};
use perkgate_domain::{Config, DirectoryConfig, EntityGrant, PartnerGrant};
use serde_json::Value;
use tower::ServiceExt;

/// Context over two memory backends with one active student (`S1`) and one
/// till (`till-1`) allowed to redeem for partner `P1`, all in tenant `T1`.
pub async fn setup_context() -> Arc<AppContext> {
    let mut config = Config::default();
    config.codes.digest_pepper = "api-tests".into();
    config.directory = DirectoryConfig::Static {
        active_entities: vec![EntityGrant { tenant_id: "T1".into(), entity_id: "S1".into() }],
        partner_grants: vec![PartnerGrant {
            tenant_id: "T1".into(),
            partner_id: "P1".into(),
            caller_id: "till-1".into(),
        }],
    };
    Arc::new(AppContext::new(config).await.expect("context builds"))
}

/// Headers for one caller; `None` leaves the whole set off
pub type Identity<'a> = Option<(&'a str, &'a str, &'a str)>;

pub const STUDENT: Identity<'static> = Some(("T1", "student", "S1"));
pub const PARTNER: Identity<'static> = Some(("T1", "partner", "till-1"));

/// Send one request through a fresh router and decode the JSON body
pub async fn send(
    ctx: &Arc<AppContext>,
    method: Method,
    uri: &str,
    identity: Identity<'_>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some((tenant, role, caller)) = identity {
        request = request
            .header("x-tenant-id", tenant)
            .header("x-role", role)
            .header("x-caller-id", caller);
    }
    let request = match body {
        Some(json) => request
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router(Arc::clone(ctx)).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}
