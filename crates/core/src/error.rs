//! Unified error types for tally.
//!
//! Every variant carries a stable code prefix so callers and tests can match
//! on the kind without parsing free text.

use rmcp::model::{ErrorCode, ErrorData as McpError};

/// Unified error types for the origin and consumer tiers.
///
/// `Clone` because a single upstream outcome is handed to every caller that
/// joined the same in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty key list).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Malformed dataset key.
    #[error("INVALID_KEY: {0}")]
    InvalidKey(String),

    /// Invalid upstream URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// A single upstream attempt exceeded its deadline. Retryable.
    #[error("UPSTREAM_TIMEOUT: {key} after {timeout_ms}ms")]
    UpstreamTimeout { key: String, timeout_ms: u64 },

    /// A single upstream attempt failed. Retryable.
    #[error("UPSTREAM_ERROR: {0}")]
    Upstream(String),

    /// HTTP error response from the upstream. Retryable for 5xx, 408 and 429.
    #[error("HTTP_ERROR: status {status} for {key}")]
    HttpError { status: u16, key: String },

    /// Every attempt for a key failed.
    #[error("UPSTREAM_UNAVAILABLE: {key} after {attempts} attempt(s): {last_error}")]
    UpstreamUnavailable { key: String, attempts: u32, last_error: String },

    /// Nothing fresh, nothing cached, no fallback.
    #[error("NO_DATA_AVAILABLE: {0}")]
    NoDataAvailable(String),

    /// One or more keys failed during an orchestrated refresh.
    #[error("PARTIAL_REFRESH_FAILURE: {}", failed.join(", "))]
    PartialForceRefreshFailure { failed: Vec<String> },

    /// One or more keys failed during a scheduled background refresh.
    #[error("BACKGROUND_REFRESH_FAILED: {}", failed.join(", "))]
    BackgroundRefreshFailed { failed: Vec<String> },
}

impl Error {
    /// Whether the fetch coordinator should try again after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::UpstreamTimeout { .. } | Error::Upstream(_) => true,
            Error::HttpError { status, .. } => !(400..500).contains(status) || matches!(status, 408 | 429),
            _ => false,
        }
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) | Error::InvalidKey(_) => -32602,
            Error::InvalidUrl(_) => -32003,
            Error::UpstreamTimeout { .. } => -32006,
            Error::HttpError { .. } => -32008,
            Error::Upstream(_) => -32020,
            Error::UpstreamUnavailable { .. } => -32021,
            Error::NoDataAvailable(_) => -32022,
            Error::PartialForceRefreshFailure { .. } => -32023,
            Error::BackgroundRefreshFailed { .. } => -32024,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NoDataAvailable("points-table".to_string());
        assert!(err.to_string().contains("NO_DATA_AVAILABLE"));
        assert!(err.to_string().contains("points-table"));
    }

    #[test]
    fn test_partial_failure_lists_keys() {
        let err = Error::PartialForceRefreshFailure { failed: vec!["a".into(), "b".into()] };
        assert_eq!(err.to_string(), "PARTIAL_REFRESH_FAILURE: a, b");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::UpstreamTimeout { key: "k".into(), timeout_ms: 10 }.is_retryable());
        assert!(Error::Upstream("boom".into()).is_retryable());
        assert!(!Error::NoDataAvailable("k".into()).is_retryable());
        assert!(!Error::InvalidKey("".into()).is_retryable());
    }

    #[test]
    fn test_http_status_retryability() {
        let http = |status| Error::HttpError { status, key: "schedule".into() };
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(http(408).is_retryable());
        assert!(http(429).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(403).is_retryable());
        assert_eq!(http(404).to_string(), "HTTP_ERROR: status 404 for schedule");
    }

    #[test]
    fn test_error_to_mcp_error() {
        let err = Error::NoDataAvailable("schedule".to_string());
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32022);
    }
}
