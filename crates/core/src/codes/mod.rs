//! Validation code lifecycle: issuance, lookup and exactly-once redemption

pub mod digest;
pub mod generator;
pub mod ports;
pub mod service;

pub use digest::CodeHasher;
pub use generator::RandomCodeGenerator;
pub use ports::{CodeGenerator, EntityStatus, PartnerScope};
pub use service::{CodeServiceSettings, ValidationCodeService};
