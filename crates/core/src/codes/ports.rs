//! Collaborator ports consumed by the code service

use async_trait::async_trait;
use perkgate_domain::{CallerIdentity, PartnerId, RedemptionError, StudentId, TenantId};

/// Student/employee management: is this entity currently active?
#[async_trait]
pub trait EntityStatus: Send + Sync {
    async fn is_active(
        &self,
        tenant_id: &TenantId,
        entity_id: &StudentId,
    ) -> Result<bool, RedemptionError>;
}

/// Partner management: may this caller redeem for this partner?
#[async_trait]
pub trait PartnerScope: Send + Sync {
    async fn partner_authorized(
        &self,
        tenant_id: &TenantId,
        partner_id: &PartnerId,
        caller: &CallerIdentity,
    ) -> Result<bool, RedemptionError>;
}

/// Source of plaintext codes
pub trait CodeGenerator: Send + Sync {
    /// A six-digit code, zero padded
    fn generate(&self) -> String;
}
