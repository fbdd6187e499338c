//! Domain types and models

pub mod auth;
pub mod code;
pub mod health;
pub mod ids;

pub use auth::{AuthContext, Role};
pub use code::{
    is_well_formed_code, CodeSummary, IssuedCode, Redemption, ValidationCode,
};
pub use health::{BackendHealth, BackendKind, HealthMode, HealthReport};
pub use ids::{CallerIdentity, CodeId, PartnerId, StudentId, TenantId};
