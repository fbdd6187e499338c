//! # Perkgate Domain
//!
//! Business domain types for the perkgate redemption backend.
//!
//! This crate contains:
//! - Validation code records and the identifiers they reference
//! - The error taxonomy shared by every layer
//! - Configuration structures
//! - Domain constants
//!
//! ## Architecture
//! - Depends only on `perkgate-common` (foundation tier)
//! - Pure data structures, no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
