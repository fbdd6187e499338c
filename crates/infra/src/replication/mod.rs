//! Background replication between primary and mirror

pub mod backlog;
pub mod errors;
pub mod replicator;

pub use backlog::{HeldTask, ReconcileBacklog};
pub use errors::ReplicationError;
pub use replicator::{
    ReplicationDirection, ReplicationQueue, ReplicationStats, ReplicationStatsSnapshot,
    ReplicationTask, Replicator, ReplicatorConfig,
};
