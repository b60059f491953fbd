//! HTTP implementation of the upstream capability.
//!
//! ### Request shape
//! - `GET {base}/{dataset}?{filters}` with `Accept: application/json`
//! - Filters are sent in key order
//!
//! ### Response handling
//! - Non-2xx statuses are `HTTP_ERROR`; only 5xx, 408 and 429 are retried
//! - A `{"success": true, "data": ...}` envelope is unwrapped to `data`
//! - Any other JSON body is the payload as-is

pub mod url;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, header};
use serde_json::Value;

pub use url::{UrlError, canonicalize_base, dataset_url};

use tally_core::{AppConfig, DatasetKey, Error, Upstream};

/// Configuration for the HTTP upstream.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL datasets are resolved against
    pub base_url: String,

    /// User agent string (default: "tally/0.1")
    pub user_agent: String,

    /// Transport-level request timeout (default: 30s)
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            user_agent: "tally/0.1".to_string(),
            timeout: Duration::from_millis(30_000),
        }
    }
}

impl UpstreamConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { base_url: config.upstream_url.clone(), user_agent: config.user_agent.clone(), timeout: config.timeout() }
    }
}

/// Pull the payload out of an upstream body.
///
/// # Errors
///
/// Returns `Error::Upstream` if the body is an envelope reporting failure.
pub fn unwrap_envelope(body: Value) -> Result<Value, Error> {
    match body {
        Value::Object(mut map) if map.contains_key("success") && map.contains_key("data") => {
            if map.get("success") == Some(&Value::Bool(false)) {
                let reason = map
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified")
                    .to_string();
                return Err(Error::Upstream(format!("upstream reported failure: {reason}")));
            }
            Ok(map.remove("data").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

/// Upstream reached over HTTP.
pub struct HttpUpstream {
    http: Client,
    base: ::url::Url,
    config: UpstreamConfig,
}

impl HttpUpstream {
    /// Create a new upstream client with the given configuration.
    pub fn new(config: UpstreamConfig) -> Result<Self, Error> {
        let base = canonicalize_base(&config.base_url).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, base, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn base(&self) -> &::url::Url {
        &self.base
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, key: &DatasetKey) -> Result<Value, Error> {
        let start = Instant::now();
        let url = dataset_url(&self.base, key).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let response = self
            .http
            .get(url.as_str())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError { status: status.as_u16(), key: key.canonical() });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("invalid JSON body: {e}")))?;

        tracing::debug!(key = %key, url = %url, fetch_ms = start.elapsed().as_millis() as u64, "upstream responded");

        unwrap_envelope(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upstream_config_default() {
        let config = UpstreamConfig::default();
        assert_eq!(config.user_agent, "tally/0.1");
        assert_eq!(config.timeout, Duration::from_millis(30_000));
    }

    #[test]
    fn test_upstream_config_from_app_config() {
        let app = AppConfig { upstream_url: "https://scores.example.com".into(), timeout_ms: 1_500, ..Default::default() };
        let config = UpstreamConfig::from_config(&app);
        assert_eq!(config.base_url, "https://scores.example.com");
        assert_eq!(config.timeout, Duration::from_millis(1_500));
    }

    #[test]
    fn test_unwrap_envelope_success() {
        let body = json!({"success": true, "data": [{"team": "KKR"}], "timestamp": "now"});
        assert_eq!(unwrap_envelope(body).unwrap(), json!([{"team": "KKR"}]));
    }

    #[test]
    fn test_unwrap_envelope_failure() {
        let body = json!({"success": false, "data": null, "error": "blocked"});
        let err = unwrap_envelope(body).unwrap_err();
        assert!(err.to_string().contains("blocked"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unwrap_bare_body() {
        let body = json!({"matches": []});
        assert_eq!(unwrap_envelope(body.clone()).unwrap(), body);
    }

    #[tokio::test]
    async fn test_http_upstream_new() {
        let upstream = HttpUpstream::new(UpstreamConfig::default());
        assert!(upstream.is_ok());
    }

    #[tokio::test]
    async fn test_http_upstream_rejects_bad_base() {
        let config = UpstreamConfig { base_url: "ftp://example.com".into(), ..Default::default() };
        let result = HttpUpstream::new(config);
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
