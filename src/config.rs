use std::env;
use std::time::Duration;

use crate::utils::error::StoreError;

pub const DEFAULT_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_DATABASE: &str = "test";
pub const DEFAULT_COLLECTION: &str = "users";

/// Connection and store settings, read from the environment (`.env` is honoured by the binary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connect_timeout: Duration,
    /// Deadline applied to every store call; `None` waits indefinitely
    pub operation_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            max_pool_size: 20,
            min_pool_size: 5,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, falling back to defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_pool_size = parse_or("MONGODB_MAX_POOL_SIZE", &lookup, defaults.max_pool_size)?;
        let min_pool_size = parse_or("MONGODB_MIN_POOL_SIZE", &lookup, defaults.min_pool_size)?;
        if min_pool_size > max_pool_size {
            return Err(StoreError::Config(format!(
                "MONGODB_MIN_POOL_SIZE ({}) exceeds MONGODB_MAX_POOL_SIZE ({})",
                min_pool_size, max_pool_size
            )));
        }

        let connect_secs = parse_or(
            "MONGODB_CONNECT_TIMEOUT_SECS",
            &lookup,
            defaults.connect_timeout.as_secs(),
        )?;

        // 0 disables the per-operation deadline
        let operation_secs = parse_or(
            "MONGODB_OPERATION_TIMEOUT_SECS",
            &lookup,
            defaults.operation_timeout.map_or(0, |d| d.as_secs()),
        )?;

        Ok(Self {
            uri: non_empty("MONGODB_URI", &lookup).unwrap_or(defaults.uri),
            database: non_empty("MONGODB_DATABASE", &lookup).unwrap_or(defaults.database),
            collection: non_empty("MONGODB_COLLECTION", &lookup).unwrap_or(defaults.collection),
            max_pool_size,
            min_pool_size,
            connect_timeout: Duration::from_secs(connect_secs),
            operation_timeout: (operation_secs > 0).then(|| Duration::from_secs(operation_secs)),
        })
    }
}

fn non_empty<F>(key: &str, lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(key: &str, lookup: &F, default: T) -> Result<T, StoreError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(key, lookup) {
        Some(raw) => raw
            .parse()
            .map_err(|e| StoreError::Config(format!("{} = '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
