//! Directory backed by the remote student/partner management service
//!
//! - `GET {base}/tenants/{tenant}/entities/{entity}` answers `{"active": bool}`
//! - `GET {base}/tenants/{tenant}/partners/{partner}/callers/{caller}` answers
//!   `{"authorized": bool}`
//!
//! A 404 means the entity or grant does not exist and is read as `false`.

use std::time::Duration;

use async_trait::async_trait;
use perkgate_core::{EntityStatus, PartnerScope};
use perkgate_domain::{
    BackendError, CallerIdentity, PartnerId, RedemptionError, StudentId, TenantId,
};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::errors::InfraError;

#[derive(Debug, Deserialize)]
struct EntityStatusResponse {
    active: bool,
}

#[derive(Debug, Deserialize)]
struct PartnerScopeResponse {
    authorized: bool,
}

/// HTTP client for the directory service
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: Url,
}

impl HttpDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url).map_err(|err| {
            InfraError(BackendError::Internal(format!("invalid directory base_url: {err}")))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError(BackendError::Internal(format!(
                "directory base_url cannot be a base: {base_url}"
            ))));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Fetch a JSON body, mapping 404 to `None`
    async fn fetch<T>(&self, url: Url) -> Result<Option<T>, InfraError>
    where
        T: for<'de> Deserialize<'de>,
    {
        debug!(%url, "querying directory");
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.json::<T>().await?;
        Ok(Some(body))
    }
}

#[async_trait]
impl EntityStatus for HttpDirectory {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, entity_id = %entity_id))]
    async fn is_active(
        &self,
        tenant_id: &TenantId,
        entity_id: &StudentId,
    ) -> Result<bool, RedemptionError> {
        let url = self.url(&["tenants", tenant_id.as_str(), "entities", entity_id.as_str()]);
        let answer = self.fetch::<EntityStatusResponse>(url).await?;
        Ok(answer.map_or(false, |body| body.active))
    }
}

#[async_trait]
impl PartnerScope for HttpDirectory {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, partner_id = %partner_id))]
    async fn partner_authorized(
        &self,
        tenant_id: &TenantId,
        partner_id: &PartnerId,
        caller: &CallerIdentity,
    ) -> Result<bool, RedemptionError> {
        let url = self.url(&[
            "tenants",
            tenant_id.as_str(),
            "partners",
            partner_id.as_str(),
            "callers",
            caller.as_str(),
        ]);
        let answer = self.fetch::<PartnerScopeResponse>(url).await?;
        Ok(answer.map_or(false, |body| body.authorized))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn directory(server: &MockServer) -> HttpDirectory {
        HttpDirectory::new(&format!("{}/directory/", server.uri()), Duration::from_secs(2))
            .expect("directory client")
    }

    #[tokio::test]
    async fn entity_status_reads_active_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/directory/tenants/T1/entities/S1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"active": true})))
            .mount(&server)
            .await;

        let active =
            directory(&server).is_active(&TenantId::new("T1"), &StudentId::new("S1")).await;
        assert_eq!(active, Ok(true));
    }

    #[tokio::test]
    async fn unknown_entity_is_inactive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let active =
            directory(&server).is_active(&TenantId::new("T1"), &StudentId::new("S404")).await;
        assert_eq!(active, Ok(false));
    }

    #[tokio::test]
    async fn path_segments_are_escaped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/directory/tenants/T1/partners/P%2F1/callers/till%207"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"authorized": true})),
            )
            .mount(&server)
            .await;

        let authorized = directory(&server)
            .partner_authorized(
                &TenantId::new("T1"),
                &PartnerId::new("P/1"),
                &CallerIdentity::new("till 7"),
            )
            .await;
        assert_eq!(authorized, Ok(true));
    }

    #[tokio::test]
    async fn server_errors_surface_as_collaborator_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = directory(&server)
            .partner_authorized(&TenantId::new("T1"), &PartnerId::new("P1"), &CallerIdentity::new("c"))
            .await;
        assert!(matches!(result, Err(RedemptionError::Collaborator(_))));
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(HttpDirectory::new("not a url", Duration::from_secs(1)).is_err());
    }
}
