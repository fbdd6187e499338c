//! Service configuration
//!
//! Every section has working defaults except `codes.digest_pepper`, which
//! must be supplied by the deployment. Loading from env/files lives in
//! `perkgate-infra::config`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use perkgate_common::{duration_millis, duration_secs};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BACKEND_TIMEOUT_MS, DEFAULT_BIND_ADDR, DEFAULT_CODE_TTL_SECS, DEFAULT_COOLDOWN_SECS,
    DEFAULT_DIRECTORY_TIMEOUT_MS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_OPEN_TRIALS,
    DEFAULT_MAX_GENERATION_ATTEMPTS, DEFAULT_PURGE_RETENTION_SECS, DEFAULT_RECONCILE_INTERVAL_MS,
    DEFAULT_REPLICATION_INITIAL_BACKOFF_MS, DEFAULT_REPLICATION_MAX_ATTEMPTS,
    DEFAULT_REPLICATION_MAX_BACKOFF_MS, DEFAULT_REPLICATION_QUEUE_CAPACITY,
    DEFAULT_SQLITE_POOL_SIZE,
};
use crate::errors::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub primary: BackendConfig,
    pub mirror: BackendConfig,
    pub breaker: BreakerSettings,
    pub store: StoreSettings,
    pub codes: CodeSettings,
    pub replication: ReplicationSettings,
    pub directory: DirectoryConfig,
}

impl Config {
    /// Reject settings that would make the service misbehave at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if self.breaker.half_open_trial_count == 0 {
            return Err(ConfigError::invalid("breaker.half_open_trial_count", "must be at least 1"));
        }
        if self.store.backend_timeout.is_zero() {
            return Err(ConfigError::invalid("store.backend_timeout_ms", "must be positive"));
        }
        if self.codes.ttl.is_zero() {
            return Err(ConfigError::invalid("codes.ttl_secs", "must be positive"));
        }
        if self.codes.max_generation_attempts == 0 {
            return Err(ConfigError::invalid("codes.max_generation_attempts", "must be at least 1"));
        }
        if self.codes.digest_pepper.trim().is_empty() {
            return Err(ConfigError::Missing("codes.digest_pepper".into()));
        }
        if self.replication.queue_capacity == 0 {
            return Err(ConfigError::invalid("replication.queue_capacity", "must be at least 1"));
        }
        if self.replication.max_attempts == 0 {
            return Err(ConfigError::invalid("replication.max_attempts", "must be at least 1"));
        }
        if self.replication.reconcile_interval.is_zero() {
            return Err(ConfigError::invalid("replication.reconcile_interval_ms", "must be positive"));
        }
        self.primary.validate("primary")?;
        self.mirror.validate("mirror")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: DEFAULT_BIND_ADDR.to_string() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

/// One physical store
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Process-local document store
    #[default]
    Memory,
    /// PostgreSQL with records kept as JSONB documents
    Postgres { url: String },
    /// SQLite relational table
    Sqlite {
        path: PathBuf,
        #[serde(default = "default_pool_size")]
        pool_size: u32,
    },
}

fn default_pool_size() -> u32 {
    DEFAULT_SQLITE_POOL_SIZE
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Memory => "memory",
            BackendConfig::Postgres { .. } => "postgres",
            BackendConfig::Sqlite { .. } => "sqlite",
        }
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        match self {
            BackendConfig::Memory => Ok(()),
            BackendConfig::Postgres { url } if url.trim().is_empty() => {
                Err(ConfigError::invalid(format!("{section}.url"), "must not be empty"))
            }
            BackendConfig::Postgres { .. } => Ok(()),
            BackendConfig::Sqlite { pool_size, .. } if *pool_size == 0 => {
                Err(ConfigError::invalid(format!("{section}.pool_size"), "must be at least 1"))
            }
            BackendConfig::Sqlite { .. } => Ok(()),
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Memory => f.write_str("Memory"),
            // Connection strings may carry credentials
            BackendConfig::Postgres { .. } => {
                f.debug_struct("Postgres").field("url", &"<redacted>").finish()
            }
            BackendConfig::Sqlite { path, pool_size } => f
                .debug_struct("Sqlite")
                .field("path", path)
                .field("pool_size", pool_size)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    #[serde(rename = "cooldown_secs", with = "duration_secs")]
    pub cooldown: Duration,
    pub half_open_trial_count: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            half_open_trial_count: DEFAULT_HALF_OPEN_TRIALS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Upper bound on any single adapter call
    #[serde(rename = "backend_timeout_ms", with = "duration_millis")]
    pub backend_timeout: Duration,
    /// Expired rows older than this are removed by the purge task
    #[serde(rename = "purge_retention_secs", with = "duration_secs")]
    pub purge_retention: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend_timeout: Duration::from_millis(DEFAULT_BACKEND_TIMEOUT_MS),
            purge_retention: Duration::from_secs(DEFAULT_PURGE_RETENTION_SECS),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeSettings {
    #[serde(rename = "ttl_secs", with = "duration_secs")]
    pub ttl: Duration,
    pub max_generation_attempts: u32,
    /// Server-side secret mixed into every code digest
    pub digest_pepper: String,
}

impl Default for CodeSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECS),
            max_generation_attempts: DEFAULT_MAX_GENERATION_ATTEMPTS,
            digest_pepper: String::new(),
        }
    }
}

impl fmt::Debug for CodeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeSettings")
            .field("ttl", &self.ttl)
            .field("max_generation_attempts", &self.max_generation_attempts)
            .field("digest_pepper", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    #[serde(rename = "initial_backoff_ms", with = "duration_millis")]
    pub initial_backoff: Duration,
    #[serde(rename = "max_backoff_ms", with = "duration_millis")]
    pub max_backoff: Duration,
    /// How often writes held for the primary are retried
    #[serde(rename = "reconcile_interval_ms", with = "duration_millis")]
    pub reconcile_interval: Duration,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_REPLICATION_QUEUE_CAPACITY,
            max_attempts: DEFAULT_REPLICATION_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_REPLICATION_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_REPLICATION_MAX_BACKOFF_MS),
            reconcile_interval: Duration::from_millis(DEFAULT_RECONCILE_INTERVAL_MS),
        }
    }
}

/// Where entity status and partner scope answers come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectoryConfig {
    /// Fixed lists, for development and tests
    Static {
        #[serde(default)]
        active_entities: Vec<EntityGrant>,
        #[serde(default)]
        partner_grants: Vec<PartnerGrant>,
    },
    /// Remote student/partner management service
    Http {
        base_url: String,
        #[serde(default = "default_directory_timeout", rename = "timeout_ms", with = "duration_millis")]
        timeout: Duration,
    },
}

fn default_directory_timeout() -> Duration {
    Duration::from_millis(DEFAULT_DIRECTORY_TIMEOUT_MS)
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig::Static { active_entities: Vec::new(), partner_grants: Vec::new() }
    }
}

/// An entity that is active within a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityGrant {
    pub tenant_id: String,
    pub entity_id: String,
}

/// A caller allowed to redeem on behalf of a partner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerGrant {
    pub tenant_id: String,
    pub partner_id: String,
    pub caller_id: String,
}
