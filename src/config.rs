//! Application configuration: TOML file, environment overrides, validation.
//!
//! Lookup order for the file:
//! 1. An explicit path (must exist)
//! 2. `$XDG_CONFIG_HOME/harvester/config.toml`
//! 3. `$HOME/.config/harvester/config.toml`
//!
//! A missing default file means built-in defaults. Environment variables
//! (`HARVESTER_DB_PATH`, `HARVESTER_SEARCH_API_URL`, `HARVESTER_SEARCH_API_KEY`,
//! `HARVESTER_SEARCH_MODEL`) override the file.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, DatabaseOptions};
use crate::engine::{DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, EngineOptions, RetryPolicy};

pub const ENV_DB_PATH: &str = "HARVESTER_DB_PATH";
pub const ENV_SEARCH_API_URL: &str = "HARVESTER_SEARCH_API_URL";
pub const ENV_SEARCH_API_KEY: &str = "HARVESTER_SEARCH_API_KEY";
pub const ENV_SEARCH_MODEL: &str = "HARVESTER_SEARCH_MODEL";

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("harvester.db"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// `[discovery]` section.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini-search-preview".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl std::fmt::Debug for DiscoveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// `[processing]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    pub concurrency: usize,
    pub same_domain_delay_ms: u64,
    /// Attempts per link, including the first.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub processing_timeout_secs: u64,
    /// Default `--limit` for `process`.
    pub pending_batch_limit: u32,
    /// Process new links right after a discovery run.
    pub auto_process: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            same_domain_delay_ms: 3000,
            max_retries: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: 2000,
            processing_timeout_secs: 30,
            pending_batch_limit: 100,
            auto_process: true,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub discovery: DiscoveryConfig,
    pub processing: ProcessingConfig,
}

impl AppConfig {
    /// Parses TOML text. Does not validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Loads, applies process environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] when `explicit` does not exist, or any
    /// read, parse or validation error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(explicit, |name| std::env::var_os(name))
    }

    /// [`load`](Self::load) with an injectable environment lookup.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load).
    pub fn load_with<F>(explicit: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let mut config = match explicit {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Self::read_file(path)?,
            None => match resolve_default_config_path(&env) {
                Some(path) if path.exists() => Self::read_file(&path)?,
                Some(path) => {
                    debug!(path = %path.display(), "no config file; using defaults");
                    Self::default()
                }
                None => Self::default(),
            },
        };
        config.apply_env_overrides(&env);
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading config file");
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Applies the `HARVESTER_*` overrides; empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let non_empty = |name: &str| env(name).filter(|value| !value.is_empty());

        if let Some(path) = non_empty(ENV_DB_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(url) = non_empty(ENV_SEARCH_API_URL) {
            self.discovery.api_url = url.to_string_lossy().into_owned();
        }
        if let Some(key) = non_empty(ENV_SEARCH_API_KEY) {
            self.discovery.api_key = key.to_string_lossy().into_owned();
        }
        if let Some(model) = non_empty(ENV_SEARCH_MODEL) {
            self.discovery.model = model.to_string_lossy().into_owned();
        }
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let db = &self.database;
        check_range("database.max_connections", db.max_connections, 1..=20, "1..=20")?;
        check_range("database.busy_timeout_ms", db.busy_timeout_ms, 0..=120_000, "0..=120000")?;

        let discovery = &self.discovery;
        if discovery.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "discovery.api_url",
                value: String::new(),
                expected: "a non-empty URL",
            });
        }
        if discovery.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "discovery.model",
                value: String::new(),
                expected: "a non-empty model name",
            });
        }
        check_timeout_secs("discovery.request_timeout_secs", discovery.request_timeout_secs)?;

        let processing = &self.processing;
        check_range("processing.concurrency", processing.concurrency, 1..=100, "1..=100")?;
        check_range(
            "processing.same_domain_delay_ms",
            processing.same_domain_delay_ms,
            0..=60_000,
            "0..=60000",
        )?;
        check_range("processing.max_retries", processing.max_retries, 1..=10, "1..=10")?;
        check_timeout_secs(
            "processing.processing_timeout_secs",
            processing.processing_timeout_secs,
        )?;
        check_range(
            "processing.pending_batch_limit",
            processing.pending_batch_limit,
            1..=u32::MAX,
            ">= 1",
        )?;
        Ok(())
    }

    /// Pool options for [`Database::new_with_options`](crate::Database::new_with_options).
    #[must_use]
    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.database.max_connections,
            busy_timeout_ms: self.database.busy_timeout_ms,
        }
    }

    /// Engine tuning for [`ProcessingEngine::new`](crate::ProcessingEngine::new).
    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        let processing = &self.processing;
        EngineOptions {
            concurrency: processing.concurrency,
            retry_policy: RetryPolicy::new(
                processing.max_retries,
                Duration::from_millis(processing.backoff_base_ms),
            ),
            same_domain_delay: Duration::from_millis(processing.same_domain_delay_ms),
            processing_timeout: Duration::from_secs(processing.processing_timeout_secs),
        }
    }
}

/// Default config file location, if a base directory is known.
#[must_use]
pub fn resolve_default_config_path<F>(env: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    let non_empty = |name: &str| env(name).filter(|value| !value.is_empty());

    if let Some(xdg_config_home) = non_empty("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("harvester")
                .join("config.toml"),
        );
    }

    let home = non_empty("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("harvester")
            .join("config.toml"),
    )
}

fn check_range<T>(
    field: &'static str,
    value: T,
    range: std::ops::RangeInclusive<T>,
    expected: &'static str,
) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            value: value.to_string(),
            expected,
        })
    }
}

fn check_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    check_range(field, value, 1..=3600, "1..=3600")
}
