//! Domain constants
//!
//! Defaults here are mirrored by `Config::default()`; change both together.

// Validation codes
pub const CODE_LENGTH: usize = 6;
pub const CODE_SPACE: u32 = 1_000_000;
pub const DEFAULT_CODE_TTL_SECS: u64 = 180;
pub const DEFAULT_MAX_GENERATION_ATTEMPTS: u32 = 5;

// Circuit breaker
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;
pub const DEFAULT_HALF_OPEN_TRIALS: u32 = 1;

// Backend calls
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 4_000;

// Replication
pub const DEFAULT_REPLICATION_QUEUE_CAPACITY: usize = 1_024;
pub const DEFAULT_REPLICATION_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_REPLICATION_INITIAL_BACKOFF_MS: u64 = 100;
pub const DEFAULT_REPLICATION_MAX_BACKOFF_MS: u64 = 2_000;
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 1_000;

// Server
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SQLITE_POOL_SIZE: u32 = 4;
pub const DEFAULT_DIRECTORY_TIMEOUT_MS: u64 = 2_000;

// Expired rows older than this are eligible for purge
pub const DEFAULT_PURGE_RETENTION_SECS: u64 = 86_400;
