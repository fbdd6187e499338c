//! Caller context supplied by the authentication layer

use serde::{Deserialize, Serialize};

use super::ids::{CallerIdentity, TenantId};

/// Role claimed by the caller's token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Employee,
    Partner,
    Admin,
}

crate::impl_domain_status_conversions!(Role {
    Student => "student",
    Employee => "employee",
    Partner => "partner",
    Admin => "admin",
});

impl Role {
    /// Students and employees request codes for themselves
    pub fn can_issue(&self) -> bool {
        matches!(self, Role::Student | Role::Employee)
    }

    /// Partners redeem codes at the point of sale
    pub fn can_redeem(&self) -> bool {
        matches!(self, Role::Partner)
    }
}

/// Identity of the caller, trusted verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub tenant_id: TenantId,
    pub role: Role,
    pub caller: CallerIdentity,
}

impl AuthContext {
    pub fn new(tenant_id: TenantId, role: Role, caller: CallerIdentity) -> Self {
        Self { tenant_id, role, caller }
    }
}
