//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (TALLY_*)
//! 2. TOML config file (if TALLY_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::{ConfigError, MAX_TTL_SECS};

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (TALLY_*)
/// 2. TOML config file (if TALLY_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the upstream data source.
    ///
    /// Set via TALLY_UPSTREAM_URL environment variable.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// User-Agent string for upstream requests.
    ///
    /// Set via TALLY_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Deadline for a single upstream attempt in milliseconds.
    ///
    /// Set via TALLY_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first failed attempt.
    ///
    /// Set via TALLY_MAX_RETRIES environment variable.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts in milliseconds.
    ///
    /// Set via TALLY_RETRY_DELAY_MS environment variable.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// TTL for datasets without an override.
    ///
    /// Set via TALLY_DEFAULT_TTL_SECS environment variable.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Per-dataset TTL overrides in seconds, keyed by dataset name.
    ///
    /// Set via TALLY_TTL_OVERRIDES__<DATASET> environment variables.
    #[serde(default = "default_ttl_overrides")]
    pub ttl_overrides: BTreeMap<String, u64>,

    /// Maximum number of records held by the origin cache.
    ///
    /// Set via TALLY_MAX_ENTRIES environment variable.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Background refresh period for hot keys in milliseconds.
    ///
    /// Set via TALLY_REFRESH_INTERVAL_MS environment variable. 0 disables it.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Keys refreshed by the background job and watched by the dashboard.
    ///
    /// Set via TALLY_HOT_KEYS environment variable.
    #[serde(default = "default_hot_keys")]
    pub hot_keys: Vec<String>,

    /// JSON file mapping keys to fallback payloads.
    ///
    /// Set via TALLY_FALLBACK_FILE environment variable.
    #[serde(default)]
    pub fallback_file: Option<PathBuf>,

    /// Consumer polling interval in milliseconds. 0 disables polling.
    ///
    /// Set via TALLY_POLL_INTERVAL_MS environment variable.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consumer deduplication window in milliseconds.
    ///
    /// Set via TALLY_DEDUPE_INTERVAL_MS environment variable.
    #[serde(default = "default_dedupe_interval_ms")]
    pub dedupe_interval_ms: u64,

    /// Upper bound on keys the dashboard tier watches. Hot keys always count;
    /// ad-hoc keys past the bound are refused.
    ///
    /// Set via TALLY_MAX_WATCHED_KEYS environment variable.
    #[serde(default = "default_max_watched_keys")]
    pub max_watched_keys: usize,
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:8080/api".into()
}

fn default_user_agent() -> String {
    "tally/0.1".into()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_ttl_overrides() -> BTreeMap<String, u64> {
    BTreeMap::from([("matches".to_string(), 60), ("points-table".to_string(), 300), ("schedule".to_string(), 3_600)])
}

fn default_max_entries() -> usize {
    256
}

fn default_refresh_interval_ms() -> u64 {
    300_000
}

fn default_hot_keys() -> Vec<String> {
    vec!["schedule".into(), "points-table".into(), "matches:status=live".into()]
}

fn default_poll_interval_ms() -> u64 {
    60_000
}

fn default_dedupe_interval_ms() -> u64 {
    5_000
}

fn default_max_watched_keys() -> usize {
    64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upstream_url: default_upstream_url(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            default_ttl_secs: default_ttl_secs(),
            ttl_overrides: default_ttl_overrides(),
            max_entries: default_max_entries(),
            refresh_interval_ms: default_refresh_interval_ms(),
            hot_keys: default_hot_keys(),
            fallback_file: None,
            poll_interval_ms: default_poll_interval_ms(),
            dedupe_interval_ms: default_dedupe_interval_ms(),
            max_watched_keys: default_max_watched_keys(),
        }
    }
}

impl AppConfig {
    /// Per-attempt timeout as Duration for use with tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Hot-key refresh period, or `None` when background refresh is off.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then_some(Duration::from_millis(self.refresh_interval_ms))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `TALLY_`
    /// 2. TOML file from `TALLY_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("TALLY_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("TALLY_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.user_agent, "tally/0.1");
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay_ms, 2_000);
        assert_eq!(config.max_entries, 256);
        assert_eq!(config.hot_keys.len(), 3);
        assert_eq!(config.max_watched_keys, 64);
        assert!(config.fallback_file.is_none());
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(30_000));
        assert_eq!(config.retry_delay(), Duration::from_millis(2_000));
        assert_eq!(config.refresh_interval(), Some(Duration::from_secs(300)));

        let disabled = AppConfig { refresh_interval_ms: 0, ..AppConfig::default() };
        assert_eq!(disabled.refresh_interval(), None);
    }
}
