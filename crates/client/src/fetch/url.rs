//! Upstream URL construction.

use tally_core::DatasetKey;

/// Error type for upstream URL failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL cannot be used as a base: {0}")]
    NotABase(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Canonicalize the upstream base URL.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Default scheme to https:// if missing
/// 3. Lowercase the host
/// 4. Drop query and fragment; datasets supply their own query
pub fn canonicalize_base(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url_str = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };

    let mut parsed = url::Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if parsed.cannot_be_a_base() {
        return Err(UrlError::NotABase(url_str));
    }

    if let Some(host) = parsed.host_str().map(str::to_lowercase) {
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_query(None);
    parsed.set_fragment(None);

    Ok(parsed)
}

/// `{base}/{dataset}?{filters}` for a dataset key.
pub fn dataset_url(base: &url::Url, key: &DatasetKey) -> Result<url::Url, UrlError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| UrlError::NotABase(base.to_string()))?
        .pop_if_empty()
        .push(key.dataset());

    if !key.filters().is_empty() {
        let mut query = url.query_pairs_mut();
        for (name, value) in key.filters() {
            query.append_pair(name, value);
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> DatasetKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_canonicalize_default_scheme() {
        let url = canonicalize_base("scores.example.com/api").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("scores.example.com"));
    }

    #[test]
    fn test_canonicalize_lowercase_host() {
        let url = canonicalize_base("http://SCORES.example.com").unwrap();
        assert_eq!(url.host_str(), Some("scores.example.com"));
    }

    #[test]
    fn test_canonicalize_drops_query_and_fragment() {
        let url = canonicalize_base("https://example.com/api?x=1#frag").unwrap();
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        assert_eq!(url.path(), "/api");
    }

    #[test]
    fn test_canonicalize_unsupported_scheme() {
        let result = canonicalize_base("ftp://example.com");
        assert!(matches!(result, Err(UrlError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_canonicalize_whitespace_only() {
        let result = canonicalize_base("   ");
        assert!(matches!(result, Err(UrlError::Empty)));
    }

    #[test]
    fn test_dataset_url_plain() {
        let base = canonicalize_base("http://127.0.0.1:8080/api").unwrap();
        let url = dataset_url(&base, &key("points-table")).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/points-table");
    }

    #[test]
    fn test_dataset_url_trailing_slash_and_filters() {
        let base = canonicalize_base("http://127.0.0.1:8080/api/").unwrap();
        let url = dataset_url(&base, &key("matches:team=csk,status=live")).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/api/matches?status=live&team=csk");
    }
}
