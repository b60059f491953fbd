//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use crate::key::DatasetKey;
use thiserror::Error;

/// Longest accepted TTL (30 days).
pub const MAX_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - any TTL is 0 or longer than `MAX_TTL_SECS`
    /// - `max_entries` is 0
    /// - a hot key does not parse
    /// - `user_agent` is empty
    ///
    /// Returns `ConfigError::Missing` if `upstream_url` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "upstream_url".into(),
                hint: "Set TALLY_UPSTREAM_URL environment variable".into(),
            });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.default_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "default_ttl_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.default_ttl_secs > MAX_TTL_SECS {
            return Err(ConfigError::Invalid {
                field: "default_ttl_secs".into(),
                reason: format!("must not exceed {MAX_TTL_SECS}s"),
            });
        }
        for (dataset, ttl) in &self.ttl_overrides {
            if *ttl == 0 || *ttl > MAX_TTL_SECS {
                return Err(ConfigError::Invalid {
                    field: format!("ttl_overrides.{dataset}"),
                    reason: format!("must be between 1 and {MAX_TTL_SECS}s"),
                });
            }
        }

        if self.max_entries == 0 {
            return Err(ConfigError::Invalid { field: "max_entries".into(), reason: "must be greater than 0".into() });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        for key in &self.hot_keys {
            if let Err(e) = key.parse::<DatasetKey>() {
                return Err(ConfigError::Invalid { field: "hot_keys".into(), reason: e.to_string() });
            }
        }

        if self.poll_interval_ms > 0 && self.poll_interval_ms < self.dedupe_interval_ms {
            tracing::warn!(
                poll_interval_ms = self.poll_interval_ms,
                dedupe_interval_ms = self.dedupe_interval_ms,
                "poll interval is shorter than the dedupe window; most polls will be suppressed"
            );
        }

        Ok(())
    }
}
