//! Fixed entity and partner lists from configuration

use std::collections::HashSet;

use async_trait::async_trait;
use perkgate_core::{EntityStatus, PartnerScope};
use perkgate_domain::{
    CallerIdentity, EntityGrant, PartnerGrant, PartnerId, RedemptionError, StudentId, TenantId,
};

/// In-process directory answering from seed lists
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    active: HashSet<(String, String)>,
    grants: HashSet<(String, String, String)>,
}

impl StaticDirectory {
    pub fn new(active_entities: &[EntityGrant], partner_grants: &[PartnerGrant]) -> Self {
        Self {
            active: active_entities
                .iter()
                .map(|grant| (grant.tenant_id.clone(), grant.entity_id.clone()))
                .collect(),
            grants: partner_grants
                .iter()
                .map(|grant| {
                    (grant.tenant_id.clone(), grant.partner_id.clone(), grant.caller_id.clone())
                })
                .collect(),
        }
    }

    pub fn activate(&mut self, tenant_id: &TenantId, entity_id: &StudentId) {
        self.active.insert((tenant_id.to_string(), entity_id.to_string()));
    }

    pub fn authorize(&mut self, tenant_id: &TenantId, partner_id: &PartnerId, caller: &CallerIdentity) {
        self.grants.insert((tenant_id.to_string(), partner_id.to_string(), caller.to_string()));
    }
}

#[async_trait]
impl EntityStatus for StaticDirectory {
    async fn is_active(
        &self,
        tenant_id: &TenantId,
        entity_id: &StudentId,
    ) -> Result<bool, RedemptionError> {
        Ok(self.active.contains(&(tenant_id.to_string(), entity_id.to_string())))
    }
}

#[async_trait]
impl PartnerScope for StaticDirectory {
    async fn partner_authorized(
        &self,
        tenant_id: &TenantId,
        partner_id: &PartnerId,
        caller: &CallerIdentity,
    ) -> Result<bool, RedemptionError> {
        Ok(self.grants.contains(&(
            tenant_id.to_string(),
            partner_id.to_string(),
            caller.to_string(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_are_tenant_scoped() {
        let directory = StaticDirectory::new(
            &[EntityGrant { tenant_id: "T1".into(), entity_id: "S1".into() }],
            &[PartnerGrant {
                tenant_id: "T1".into(),
                partner_id: "P1".into(),
                caller_id: "till-7".into(),
            }],
        );

        let s1 = StudentId::new("S1");
        assert!(directory.is_active(&TenantId::new("T1"), &s1).await.unwrap());
        assert!(!directory.is_active(&TenantId::new("T2"), &s1).await.unwrap());

        let p1 = PartnerId::new("P1");
        let till = CallerIdentity::new("till-7");
        assert!(directory.partner_authorized(&TenantId::new("T1"), &p1, &till).await.unwrap());
        assert!(!directory
            .partner_authorized(&TenantId::new("T1"), &p1, &CallerIdentity::new("till-8"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn grants_can_be_added() {
        let mut directory = StaticDirectory::default();
        let tenant = TenantId::new("T1");
        let student = StudentId::new("S9");
        assert!(!directory.is_active(&tenant, &student).await.unwrap());

        directory.activate(&tenant, &student);
        assert!(directory.is_active(&tenant, &student).await.unwrap());
    }
}
