//! Configuration loading and representation.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `ORDERFLOW_DATABASE_URL` | unset (in-memory) | `sqlite:...` or `postgres://...` |
//! | `ORDERFLOW_MAX_CONNECTIONS` | `5` | Pool size for SQL backends |
//! | `ORDERFLOW_UPDATE_POLICY` | `overwrite` | `overwrite` or `append` |
//!
//! Blank values count as unset.

use thiserror::Error;

use crate::event_handler::UpdatePolicy;

pub const DATABASE_URL_VAR: &str = "ORDERFLOW_DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "ORDERFLOW_MAX_CONNECTIONS";
pub const UPDATE_POLICY_VAR: &str = "ORDERFLOW_UPDATE_POLICY";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported database url '{0}' (expected sqlite: or postgres://)")]
    UnsupportedUrl(String),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Where status history is kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    InMemory,
    Sqlite { url: String },
    Postgres { url: String },
}

impl StorageBackend {
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        if url.starts_with("sqlite:") {
            Ok(StorageBackend::Sqlite {
                url: url.to_string(),
            })
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(StorageBackend::Postgres {
                url: url.to_string(),
            })
        } else {
            Err(ConfigError::UnsupportedUrl(url.to_string()))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::InMemory => "in-memory",
            StorageBackend::Sqlite { .. } => "sqlite",
            StorageBackend::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderflowConfig {
    pub storage: StorageBackend,
    pub max_connections: u32,
    pub update_policy: UpdatePolicy,
}

impl Default for OrderflowConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::InMemory,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            update_policy: UpdatePolicy::default(),
        }
    }
}

impl OrderflowConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage = match get(DATABASE_URL_VAR) {
            Some(url) => StorageBackend::from_url(&url)?,
            None => StorageBackend::InMemory,
        };

        let max_connections = match get(MAX_CONNECTIONS_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: MAX_CONNECTIONS_VAR,
                    value: raw,
                })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let update_policy = match get(UPDATE_POLICY_VAR) {
            Some(raw) => UpdatePolicy::parse(&raw).ok_or(ConfigError::InvalidValue {
                key: UPDATE_POLICY_VAR,
                value: raw,
            })?,
            None => UpdatePolicy::default(),
        };

        Ok(Self {
            storage,
            max_connections,
            update_policy,
        })
    }
}
