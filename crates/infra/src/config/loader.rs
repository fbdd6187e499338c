//! Configuration loader
//!
//! Loads service configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `PERKGATE_DIGEST_PEPPER` is not set, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! Every variable except the pepper is optional and overrides the default.
//! - `PERKGATE_DIGEST_PEPPER`: secret mixed into code digests (required)
//! - `PERKGATE_BIND_ADDR`: listen address
//! - `PERKGATE_LOG_LEVEL`, `PERKGATE_LOG_FORMAT` (`pretty` or `json`)
//! - `PERKGATE_PRIMARY`, `PERKGATE_MIRROR`: `memory`, a `postgres://` URL or
//!   `sqlite:<path>`
//! - `PERKGATE_BREAKER_FAILURE_THRESHOLD`, `PERKGATE_BREAKER_COOLDOWN_SECS`,
//!   `PERKGATE_BREAKER_HALF_OPEN_TRIALS`
//! - `PERKGATE_BACKEND_TIMEOUT_MS`, `PERKGATE_PURGE_RETENTION_SECS`
//! - `PERKGATE_CODE_TTL_SECS`, `PERKGATE_MAX_GENERATION_ATTEMPTS`
//! - `PERKGATE_REPLICATION_QUEUE_CAPACITY`, `PERKGATE_REPLICATION_MAX_ATTEMPTS`,
//!   `PERKGATE_RECONCILE_INTERVAL_MS`
//! - `PERKGATE_DIRECTORY_URL`, `PERKGATE_DIRECTORY_TIMEOUT_MS`
//!
//! ## File Locations
//! The loader searches the following paths (in order):
//! 1. `./perkgate.toml`, `./perkgate.json`, `./config.toml`, `./config.json`
//! 2. The same names in the parent and grandparent directories
//! 3. The same names next to the executable
//!
//! A pepper in the environment always wins over one in a file, so the file
//! can be committed without the secret.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use perkgate_domain::constants::{DEFAULT_DIRECTORY_TIMEOUT_MS, DEFAULT_SQLITE_POOL_SIZE};
use perkgate_domain::{BackendConfig, Config, ConfigError, DirectoryConfig, LogFormat};

const PEPPER_VAR: &str = "PERKGATE_DIGEST_PEPPER";
const CONFIG_FILE_NAMES: [&str; 4] = ["perkgate.toml", "perkgate.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns [`ConfigError`] if neither source yields a valid configuration.
pub fn load() -> Result<Config, ConfigError> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from `PERKGATE_*` variables layered over defaults
///
/// # Errors
/// Returns [`ConfigError::Missing`] without a pepper and
/// [`ConfigError::Invalid`] for unparsable values.
pub fn load_from_env() -> Result<Config, ConfigError> {
    let pepper = std::env::var(PEPPER_VAR)
        .map_err(|_| ConfigError::Missing(format!("environment variable {PEPPER_VAR}")))?;

    let mut config = Config::default();
    config.codes.digest_pepper = pepper;

    if let Some(addr) = env_string("PERKGATE_BIND_ADDR") {
        config.server.bind_addr = addr;
    }
    if let Some(level) = env_string("PERKGATE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env_string("PERKGATE_LOG_FORMAT") {
        config.logging.format = parse_log_format(&format)?;
    }
    if let Some(value) = env_string("PERKGATE_PRIMARY") {
        config.primary = parse_backend("PERKGATE_PRIMARY", &value)?;
    }
    if let Some(value) = env_string("PERKGATE_MIRROR") {
        config.mirror = parse_backend("PERKGATE_MIRROR", &value)?;
    }

    env_parse("PERKGATE_BREAKER_FAILURE_THRESHOLD", &mut config.breaker.failure_threshold)?;
    env_secs("PERKGATE_BREAKER_COOLDOWN_SECS", &mut config.breaker.cooldown)?;
    env_parse("PERKGATE_BREAKER_HALF_OPEN_TRIALS", &mut config.breaker.half_open_trial_count)?;
    env_millis("PERKGATE_BACKEND_TIMEOUT_MS", &mut config.store.backend_timeout)?;
    env_secs("PERKGATE_PURGE_RETENTION_SECS", &mut config.store.purge_retention)?;
    env_secs("PERKGATE_CODE_TTL_SECS", &mut config.codes.ttl)?;
    env_parse("PERKGATE_MAX_GENERATION_ATTEMPTS", &mut config.codes.max_generation_attempts)?;
    env_parse("PERKGATE_REPLICATION_QUEUE_CAPACITY", &mut config.replication.queue_capacity)?;
    env_parse("PERKGATE_REPLICATION_MAX_ATTEMPTS", &mut config.replication.max_attempts)?;
    env_millis("PERKGATE_RECONCILE_INTERVAL_MS", &mut config.replication.reconcile_interval)?;

    if let Some(base_url) = env_string("PERKGATE_DIRECTORY_URL") {
        let mut timeout = Duration::from_millis(DEFAULT_DIRECTORY_TIMEOUT_MS);
        env_millis("PERKGATE_DIRECTORY_TIMEOUT_MS", &mut timeout)?;
        config.directory = DirectoryConfig::Http { base_url, timeout };
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, searches the standard locations
/// ([`find_config_path`]). Format is chosen by extension.
///
/// # Errors
/// Returns [`ConfigError::Io`] if the file is missing or unreadable,
/// [`ConfigError::Parse`] if it does not decode, and any validation error.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::Io {
                    path: p.display().to_string(),
                    message: "file not found".into(),
                });
            }
            p
        }
        None => find_config_path()
            .ok_or_else(|| ConfigError::Missing("config file in any standard location".into()))?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
        path: config_path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut config = parse_config(&contents, &config_path)?;
    if let Some(pepper) = env_string(PEPPER_VAR) {
        config.codes.digest_pepper = pepper;
    }
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config, ConfigError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let parse_error = |message: String| ConfigError::Parse { path: path.display().to_string(), message };

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| parse_error(e.to_string())),
        "json" => serde_json::from_str(contents).map_err(|e| parse_error(e.to_string())),
        other => Err(parse_error(format!("unsupported config format: {other}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Returns the first config file found, or `None` if no file exists.
pub fn find_config_path() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend(cwd.ancestors().take(3).map(Path::to_path_buf));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

/// `memory`, `postgres://...` / `postgresql://...`, or `sqlite:<path>`
fn parse_backend(key: &str, value: &str) -> Result<BackendConfig, ConfigError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("memory") {
        return Ok(BackendConfig::Memory);
    }
    if value.starts_with("postgres://") || value.starts_with("postgresql://") {
        return Ok(BackendConfig::Postgres { url: value.to_string() });
    }
    if let Some(path) = value.strip_prefix("sqlite:") {
        if path.is_empty() {
            return Err(ConfigError::invalid(key, "sqlite backend needs a path"));
        }
        return Ok(BackendConfig::Sqlite {
            path: PathBuf::from(path),
            pool_size: DEFAULT_SQLITE_POOL_SIZE,
        });
    }
    Err(ConfigError::invalid(key, "expected memory, a postgres:// URL or sqlite:<path>"))
}

fn parse_log_format(value: &str) -> Result<LogFormat, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pretty" | "text" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        _ => Err(ConfigError::invalid("PERKGATE_LOG_FORMAT", "expected pretty or json")),
    }
}

/// Non-empty environment variable
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Overwrite `target` if `key` is set
fn env_parse<T>(key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = env_string(key) {
        *target = raw.trim().parse().map_err(|e: T::Err| ConfigError::invalid(key, e.to_string()))?;
    }
    Ok(())
}

fn env_secs(key: &str, target: &mut Duration) -> Result<(), ConfigError> {
    let mut secs = target.as_secs();
    env_parse(key, &mut secs)?;
    *target = Duration::from_secs(secs);
    Ok(())
}

fn env_millis(key: &str, target: &mut Duration) -> Result<(), ConfigError> {
    let mut millis = u64::try_from(target.as_millis()).unwrap_or(u64::MAX);
    env_parse(key, &mut millis)?;
    *target = Duration::from_millis(millis);
    Ok(())
}
