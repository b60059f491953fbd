//! Origin-tier request facade.
//!
//! `resolve` serves a key with the precedence
//! fresh cache hit → fresh fetch → stale cache → fallback → error.
//! Upstream failures are absorbed here whenever any data exists for the key,
//! so only a first-ever failure with nothing to fall back on surfaces as
//! `Error::NoDataAvailable`.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;
use crate::cache::{CacheRecord, CacheStats, CacheStore, TracingObserver, content_hash};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::coordinator::{FetchCoordinator, FetchPolicy};
use crate::key::DatasetKey;
use crate::upstream::{FallbackSource, Upstream};

/// Where a resolved payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Cache,
    Fresh,
    StaleCache,
    Fallback,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Cache => "cache",
            Source::Fresh => "fresh",
            Source::StaleCache => "stale-cache",
            Source::Fallback => "fallback",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Served an expired record because the upstream failed.
    UpstreamFetchFailed,
    /// Served the static substitute because the upstream failed and nothing was cached.
    ServedFallback,
}

/// A degraded-service notice attached to a resolved payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub key: String,
    pub at: DateTime<Utc>,
    /// The upstream error that caused the degradation.
    pub detail: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WarningKind::UpstreamFetchFailed => write!(f, "upstream fetch failed"),
            WarningKind::ServedFallback => write!(f, "upstream fetch failed; serving fallback data"),
        }
    }
}

/// A payload together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub key: String,
    pub payload: Value,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<Warning>,
    /// When the payload was fetched. `None` for fallback data.
    pub produced_at: Option<DateTime<Utc>>,
    pub etag: String,
}

impl Resolved {
    fn from_record(record: CacheRecord, source: Source, warning: Option<Warning>) -> Self {
        Self {
            key: record.key,
            payload: record.payload,
            source,
            warning,
            produced_at: Some(record.produced_at),
            etag: record.content_hash,
        }
    }
}

/// Per-dataset TTLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    pub default_secs: u64,
    pub overrides: BTreeMap<String, u64>,
}

impl TtlPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { default_secs: config.default_ttl_secs, overrides: config.ttl_overrides.clone() }
    }

    pub fn ttl_for(&self, key: &DatasetKey) -> u64 {
        self.overrides
            .get(key.dataset())
            .copied()
            .unwrap_or(self.default_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OriginStats {
    pub cache: CacheStats,
    pub in_flight: Vec<String>,
}

/// Outcome of an out-of-band refresh over several keys.
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    pub refreshed: Vec<String>,
    pub failed: BTreeMap<String, Error>,
}

impl RefreshSummary {
    /// # Errors
    ///
    /// Returns `Error::BackgroundRefreshFailed` naming every key that failed.
    pub fn into_result(self) -> Result<(), Error> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(Error::BackgroundRefreshFailed { failed: self.failed.into_keys().collect() })
        }
    }
}

/// Origin cache, fetch coordination and fallback, composed.
pub struct OriginService {
    store: Arc<CacheStore>,
    coordinator: FetchCoordinator,
    upstream: Arc<dyn Upstream>,
    fallback: Arc<dyn FallbackSource>,
    ttl: TtlPolicy,
}

impl OriginService {
    pub fn new(
        store: Arc<CacheStore>, coordinator: FetchCoordinator, upstream: Arc<dyn Upstream>,
        fallback: Arc<dyn FallbackSource>, ttl: TtlPolicy,
    ) -> Self {
        Self { store, coordinator, upstream, fallback, ttl }
    }

    /// Build the origin tier from configuration, logging store events.
    pub fn from_config(
        config: &AppConfig, clock: Arc<dyn Clock>, upstream: Arc<dyn Upstream>, fallback: Arc<dyn FallbackSource>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        let store = CacheStore::new(capacity, clock).with_observer(Arc::new(TracingObserver));
        Self::new(
            Arc::new(store),
            FetchCoordinator::new(FetchPolicy::from_config(config)),
            upstream,
            fallback,
            TtlPolicy::from_config(config),
        )
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Resolve `key` with the configured upstream, fallback and TTL.
    pub async fn resolve(&self, key: &DatasetKey, force_refresh: bool) -> Result<Resolved, Error> {
        self.resolve_with(key, self.ttl.ttl_for(key), self.upstream.clone(), self.fallback.as_ref(), force_refresh)
            .await
    }

    /// Resolve `key` with explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoDataAvailable` when the upstream failed, nothing is
    /// cached and `fallback` has nothing for the key, and
    /// `Error::InvalidInput` for a zero TTL.
    pub async fn resolve_with(
        &self, key: &DatasetKey, ttl_secs: u64, upstream: Arc<dyn Upstream>, fallback: &dyn FallbackSource,
        force_refresh: bool,
    ) -> Result<Resolved, Error> {
        if ttl_secs == 0 {
            return Err(Error::InvalidInput("ttl_secs must be greater than 0".into()));
        }

        let canonical = key.canonical();

        if force_refresh {
            self.store.invalidate(&canonical);
        } else if let Some(record) = self.store.get(&canonical)
            && !record.is_expired(self.store.now())
        {
            tracing::debug!(key = %canonical, "origin cache hit");
            return Ok(Resolved::from_record(record, Source::Cache, None));
        }

        let error = match self.coordinator.fetch_or_join(key, upstream).await {
            Ok(payload) => {
                let record = self.store.set(&canonical, payload, ttl_secs);
                return Ok(Resolved::from_record(record, Source::Fresh, None));
            }
            Err(e) => e,
        };

        let now = self.store.now();

        if let Some(record) = self.store.get(&canonical) {
            tracing::warn!(
                key = %canonical,
                age_secs = record.age(now).num_seconds(),
                error = %error,
                "serving stale cache after upstream failure"
            );
            let warning =
                Warning { kind: WarningKind::UpstreamFetchFailed, key: canonical, at: now, detail: error.to_string() };
            return Ok(Resolved::from_record(record, Source::StaleCache, Some(warning)));
        }

        if let Some(payload) = fallback.fallback_for(key) {
            tracing::warn!(key = %canonical, error = %error, "serving fallback dataset after upstream failure");
            return Ok(Resolved {
                etag: content_hash(&payload),
                payload,
                source: Source::Fallback,
                warning: Some(Warning {
                    kind: WarningKind::ServedFallback,
                    key: canonical.clone(),
                    at: now,
                    detail: error.to_string(),
                }),
                produced_at: None,
                key: canonical,
            });
        }

        tracing::error!(key = %canonical, error = %error, "no data available");
        Err(Error::NoDataAvailable(canonical))
    }

    /// Fetch `key` out of band and store it on success.
    ///
    /// Unlike a forced `resolve`, nothing is invalidated first, so a failed
    /// refresh leaves the previous record in place for stale serving.
    pub async fn refresh(&self, key: &DatasetKey) -> Result<Resolved, Error> {
        let payload = self.coordinator.fetch_or_join(key, self.upstream.clone()).await?;
        let record = self.store.set(&key.canonical(), payload, self.ttl.ttl_for(key));
        Ok(Resolved::from_record(record, Source::Fresh, None))
    }

    /// Refresh several keys concurrently.
    pub async fn refresh_all(&self, keys: &[DatasetKey]) -> RefreshSummary {
        let results = futures_util::future::join_all(keys.iter().map(|k| self.refresh(k))).await;

        let mut summary = RefreshSummary::default();
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(_) => summary.refreshed.push(key.canonical()),
                Err(e) => {
                    summary.failed.insert(key.canonical(), e);
                }
            }
        }

        tracing::info!(refreshed = summary.refreshed.len(), failed = summary.failed.len(), "background refresh done");
        summary
    }

    pub fn stats(&self) -> OriginStats {
        OriginStats { cache: self.store.stats(), in_flight: self.coordinator.in_flight_keys() }
    }
}
