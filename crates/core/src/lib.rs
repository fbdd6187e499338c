//! # Perkgate Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for storage and collaborators
//! - The validation code service
//!
//! ## Architecture Principles
//! - Only depends on `perkgate-common` and `perkgate-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod codes;
pub mod storage;

pub use codes::{
    CodeGenerator, CodeHasher, CodeServiceSettings, EntityStatus, PartnerScope,
    RandomCodeGenerator, ValidationCodeService,
};
pub use storage::{
    BackendAdapter, CodeFilter, CodeKey, CodeStore, Consistency, Served, WriteCondition,
    WriteOutcome,
};
