//! Configuration for the SQL guard server
//!
//! Built once at startup and handed to each component's constructor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Env var overriding `database.url`
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// SQLite file path, or a `postgres://` URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Pool size (postgres only)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long to wait for a pooled connection before giving up
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_url() -> String {
    "database.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            url: default_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Row cap for read-only queries
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Ceiling for any single statement
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
}

fn default_max_rows() -> usize {
    1000
}

fn default_statement_timeout() -> u64 {
    10
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            statement_timeout_secs: default_statement_timeout(),
        }
    }
}

impl Limits {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    2000
}

fn default_multiplier() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            multiplier: default_multiplier(),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("database.url cannot be empty")]
    EmptyUrl,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config TOML")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration.
    ///
    /// An explicit path (CLI flag or `SQLGUARD_CONFIG_PATH`) must exist and
    /// parse. Otherwise these are tried in order, skipping unreadable files:
    /// 1. `./sqlguard.toml`
    /// 2. `$XDG_CONFIG_HOME/sqlguard/config.toml`
    /// 3. Default config
    ///
    /// `DATABASE_URL` overrides the database url either way.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => {
                let config = Self::from_file(path)?;
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            None => Self::discover(),
        };

        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::info!("Using database url from {}", DATABASE_URL_ENV);
                config.database.url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn discover() -> Self {
        let mut config_paths = vec![PathBuf::from("sqlguard.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            config_paths.push(config_dir.join("sqlguard").join("config.toml"));
        }

        for path in config_paths {
            if !path.exists() {
                continue;
            }
            match Self::from_file(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    tracing::warn!("Skipping config {}: {:#}", path.display(), e);
                }
            }
        }

        tracing::info!("Using default configuration");
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.limits.max_rows == 0 {
            return Err(ConfigError::Zero("limits.max_rows"));
        }
        if self.limits.statement_timeout_secs == 0 {
            return Err(ConfigError::Zero("limits.statement_timeout_secs"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero("retry.max_attempts"));
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::Zero("retry.multiplier"));
        }
        Ok(())
    }
}
