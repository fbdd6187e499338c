//! # Perkgate Infrastructure
//!
//! Implementations of the core ports.
//!
//! This crate contains:
//! - Backend adapters: in-memory and PostgreSQL document stores, SQLite
//!   relational mirror
//! - The resilient store that fails over between them behind circuit
//!   breakers
//! - The asynchronous replicator
//! - Entity status and partner scope collaborators (static and HTTP)
//! - Configuration loading and logging bootstrap
//!
//! ## Architecture
//! - Implements traits defined in `perkgate-core`
//! - Contains all "impure" code (I/O, drivers, network)

pub mod config;
pub mod database;
pub mod directory;
pub mod documents;
pub mod errors;
pub mod observability;
pub mod replication;
pub mod store;

// Re-export commonly used items
pub use database::{DbManager, SqliteCodeRepository};
pub use directory::{build_directory, Collaborators, HttpDirectory, StaticDirectory};
pub use documents::{MemoryDocumentStore, PostgresDocumentStore};
pub use errors::InfraError;
pub use observability::init_tracing;
pub use replication::{
    ReplicationDirection, ReplicationError, ReplicationQueue, ReplicationTask, Replicator,
    ReplicatorConfig,
};
pub use store::{build_adapter, build_breaker, ResilientStore};
