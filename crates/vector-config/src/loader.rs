//! Configuration loading from files and environment.

use crate::config::ClientConfig;
use crate::error::ConfigError;
use std::path::Path;
use tracing::debug;
use validator::Validate;

/// Remote service host
pub const ENV_HOST: &str = "CHROMADB_HOST";
/// Remote service port
pub const ENV_PORT: &str = "CHROMADB_PORT";
/// Redis cache URL
pub const ENV_REDIS_URL: &str = "REDIS_URL";
/// Connection pool capacity
pub const ENV_MAX_CONNECTIONS: &str = "VECTOR_CLIENT_MAX_CONNECTIONS";
/// Total attempts per call
pub const ENV_RETRY_ATTEMPTS: &str = "VECTOR_CLIENT_RETRY_ATTEMPTS";
/// Cache toggle
pub const ENV_CACHE_ENABLED: &str = "VECTOR_CLIENT_CACHE_ENABLED";

/// Load, override from the process environment, and validate.
///
/// The format follows the file extension: `.yaml`/`.yml`, `.toml` or `.json`.
pub fn load_config(path: impl AsRef<Path>) -> Result<ClientConfig, ConfigError> {
    load_config_with(path, |name| std::env::var(name).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with<F>(path: impl AsRef<Path>, lookup: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path.as_ref();
    let mut config = parse_file(path)?;
    apply_env_overrides(&mut config, lookup)?;
    config.validate()?;
    debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Defaults overridden from the process environment, validated.
pub fn from_env() -> Result<ClientConfig, ConfigError> {
    from_env_with(|name| std::env::var(name).ok())
}

/// [`from_env`] with an explicit environment lookup.
pub fn from_env_with<F>(lookup: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();
    apply_env_overrides(&mut config, lookup)?;
    config.validate()?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("yaml" | "yml") => {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string())),
        Some("json") => {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Apply the supported environment overrides to `config`.
pub fn apply_env_overrides<F>(config: &mut ClientConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup(ENV_HOST) {
        config.endpoint.host = host;
    }
    if let Some(port) = lookup(ENV_PORT) {
        config.endpoint.port = parse_env(ENV_PORT, &port)?;
    }
    if let Some(url) = lookup(ENV_REDIS_URL) {
        config.cache.redis_url = Some(url).filter(|url| !url.is_empty());
    }
    if let Some(max) = lookup(ENV_MAX_CONNECTIONS) {
        config.pool.max_connections = parse_env(ENV_MAX_CONNECTIONS, &max)?;
    }
    if let Some(attempts) = lookup(ENV_RETRY_ATTEMPTS) {
        config.retry.retry_attempts = parse_env(ENV_RETRY_ATTEMPTS, &attempts)?;
    }
    if let Some(enabled) = lookup(ENV_CACHE_ENABLED) {
        config.cache.enabled = parse_bool(ENV_CACHE_ENABLED, &enabled)?;
    }
    Ok(())
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        name: name.to_string(),
        message: format!("'{value}': {e}"),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Env {
            name: name.to_string(),
            message: format!("'{other}' is not a boolean"),
        }),
    }
}
