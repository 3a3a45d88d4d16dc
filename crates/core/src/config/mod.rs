//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (QCACHE_*)
//! 2. TOML config file (if QCACHE_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! Nothing here is read implicitly: a loaded [`CacheConfig`] is passed to the
//! constructors that need it, so several caches with different policies can
//! live in one process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::strategy::InvalidationMode;

mod validation;

pub use validation::ConfigError;

/// One named strategy as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub ttl_seconds: u64,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub invalidation_mode: InvalidationMode,
}

/// Cache configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (QCACHE_*)
/// 2. TOML config file (if QCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Global switch. When off, every read-through call computes directly and
    /// the answer cache never hits.
    ///
    /// Set via QCACHE_ENABLED environment variable.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to SQLite cache database.
    ///
    /// Set via QCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Upper bound for any single store operation, in milliseconds.
    ///
    /// Set via QCACHE_STORE_TIMEOUT_MS environment variable.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Share one computation between concurrent misses on the same key.
    ///
    /// Set via QCACHE_COALESCE_MISSES environment variable.
    #[serde(default = "default_true")]
    pub coalesce_misses: bool,

    /// TTL of the fallback strategy used for unknown strategy names.
    ///
    /// Set via QCACHE_DEFAULT_TTL_SECONDS environment variable.
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,

    /// TTL applied to answers stored without an explicit TTL.
    ///
    /// Set via QCACHE_ANSWER_TTL_SECONDS environment variable.
    #[serde(default = "default_answer_ttl_seconds")]
    pub answer_ttl_seconds: u64,

    /// Named strategies.
    ///
    /// Set via `[strategies.<name>]` tables or
    /// QCACHE_STRATEGIES__<NAME>__TTL_SECONDS style variables.
    #[serde(default)]
    pub strategies: BTreeMap<String, StrategySpec>,
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./qcache.sqlite")
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_answer_ttl_seconds() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
            store_timeout_ms: default_store_timeout_ms(),
            coalesce_misses: true,
            default_ttl_seconds: default_ttl_seconds(),
            answer_ttl_seconds: default_answer_ttl_seconds(),
            strategies: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    /// Store timeout as Duration for use with tokio.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Add or replace a strategy.
    pub fn with_strategy(mut self, name: impl Into<String>, spec: StrategySpec) -> Self {
        self.strategies.insert(name.into(), spec);
        self
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("QCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        Self::extract(figment.merge(
            Env::prefixed("QCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        ))
    }

    /// Load defaults overlaid with a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
