use std::time::Duration;

use thiserror::Error;

/// Lifecycle errors of the replicator
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("replicator is already running")]
    AlreadyRunning,

    #[error("replicator is not running")]
    NotRunning,

    #[error("replication queue receiver was lost after a failed stop")]
    QueueLost,

    #[error("replicator did not stop within {0:?}")]
    JoinTimeout(Duration),

    #[error("replicator task panicked: {0}")]
    TaskPanicked(String),
}
