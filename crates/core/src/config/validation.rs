//! Configuration validation rules.
//!
//! This module provides validation logic for `CacheConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::clock::MAX_TTL_SECONDS;
use crate::config::CacheConfig;
use crate::strategy::InvalidationMode;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `store_timeout_ms` is 0 or exceeds one minute
    /// - `default_ttl_seconds` or `answer_ttl_seconds` is 0 or above
    ///   [`MAX_TTL_SECONDS`]
    /// - a strategy has an empty name or a TTL out of that range
    /// - a `tag` strategy has no tags
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "store_timeout_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.store_timeout_ms > 60_000 {
            return Err(ConfigError::Invalid {
                field: "store_timeout_ms".into(),
                reason: "must not exceed 1 minute (60000ms)".into(),
            });
        }

        check_ttl("default_ttl_seconds", self.default_ttl_seconds)?;
        check_ttl("answer_ttl_seconds", self.answer_ttl_seconds)?;

        for (name, spec) in &self.strategies {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid { field: "strategies".into(), reason: "name must not be empty".into() });
            }
            check_ttl(&format!("strategies.{name}.ttl_seconds"), spec.ttl_seconds)?;
            if spec.invalidation_mode == InvalidationMode::Tag && spec.tags.is_empty() {
                return Err(ConfigError::Invalid {
                    field: format!("strategies.{name}.tags"),
                    reason: "tag invalidation needs at least one tag".into(),
                });
            }
        }

        if !self.enabled {
            tracing::warn!("query cache disabled by configuration; all calls compute directly");
        }

        Ok(())
    }
}

fn check_ttl(field: &str, ttl_seconds: u64) -> Result<(), ConfigError> {
    if ttl_seconds == 0 {
        return Err(ConfigError::Invalid { field: field.into(), reason: "must be greater than 0".into() });
    }
    if ttl_seconds > MAX_TTL_SECONDS {
        return Err(ConfigError::Invalid {
            field: field.into(),
            reason: format!("must not exceed {MAX_TTL_SECONDS} seconds (100 years)"),
        });
    }
    Ok(())
}
