//! Shared server state: both cache tiers and the refresh orchestrator.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tally_client::{ConsumerCache, ConsumerPolicy, ForceRefreshOrchestrator, HttpUpstream, UpstreamConfig};
use tally_core::{
    AppConfig, Clock, ConditionalResponder, DatasetKey, Error, FallbackSource, NoFallback, OriginService,
    RefreshScheduler, StaticFallback, SystemClock,
};

pub struct AppState {
    pub origin: Arc<OriginService>,
    pub consumer: ConsumerCache,
    pub orchestrator: ForceRefreshOrchestrator,
    pub responder: ConditionalResponder,
    pub clock: Arc<dyn Clock>,
    /// Most keys `try_watch` lets the consumer tier hold.
    pub watch_limit: usize,
}

impl AppState {
    pub fn new(origin: Arc<OriginService>, clock: Arc<dyn Clock>, watch_limit: usize) -> Self {
        let consumer = ConsumerCache::new(origin.clone(), clock.clone());
        Self {
            orchestrator: ForceRefreshOrchestrator::new(origin.clone(), consumer.clone()),
            origin,
            consumer,
            responder: ConditionalResponder,
            clock,
            watch_limit,
        }
    }

    /// Build both tiers against the configured HTTP upstream.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let upstream = HttpUpstream::new(UpstreamConfig::from_config(config)).context("building upstream client")?;
        let fallback = load_fallback(config.fallback_file.as_deref()).await?;

        tracing::info!(upstream = %upstream.base(), "upstream configured");

        let origin = OriginService::from_config(config, clock.clone(), Arc::new(upstream), fallback);
        Ok(Self::new(Arc::new(origin), clock, config.max_watched_keys))
    }

    /// Keep `keys` warm in the consumer tier.
    pub fn watch(&self, keys: &[DatasetKey], policy: ConsumerPolicy) {
        for key in keys {
            // handles are never released; hot keys live as long as the process
            let _handle = self.consumer.subscribe(key, policy);
        }
    }

    /// Watch an ad-hoc key unless `watch_limit` keys are already watched.
    pub fn try_watch(&self, key: &DatasetKey, policy: ConsumerPolicy) -> bool {
        self.consumer
            .try_subscribe(key, policy, self.watch_limit)
            .is_some()
    }

    /// Refresh `keys` in the origin tier every `config.refresh_interval()`.
    ///
    /// Returns `None` when background refresh is disabled.
    pub fn start_refresh(&self, config: &AppConfig, keys: Vec<DatasetKey>) -> Option<RefreshScheduler> {
        let Some(every) = config.refresh_interval() else {
            tracing::info!("background refresh disabled");
            return None;
        };

        let mut scheduler = RefreshScheduler::new("hot-keys");
        let origin = self.origin.clone();
        let keys = Arc::new(keys);

        scheduler.schedule(every, move || {
            let origin = origin.clone();
            let keys = keys.clone();
            async move { origin.refresh_all(&keys).await.into_result() }
        });
        Some(scheduler)
    }
}

/// Parse the configured hot keys.
pub fn hot_keys(config: &AppConfig) -> Result<Vec<DatasetKey>, Error> {
    config.hot_keys.iter().map(|raw| raw.parse()).collect()
}

async fn load_fallback(path: Option<&Path>) -> Result<Arc<dyn FallbackSource>> {
    let Some(path) = path else {
        return Ok(Arc::new(NoFallback));
    };

    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading fallback file {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing fallback file {}", path.display()))?;
    let fallback = StaticFallback::from_json(json)?;

    tracing::info!(path = %path.display(), datasets = fallback.len(), "fallback datasets loaded");
    Ok(Arc::new(fallback))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::num::NonZeroUsize;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tally_core::{CacheStore, FetchCoordinator, FetchPolicy, ManualClock, TtlPolicy, Upstream};

    /// Serves whatever is currently stored per dataset.
    #[derive(Default)]
    pub struct FakeUpstream {
        values: Mutex<BTreeMap<String, Value>>,
        calls: AtomicUsize,
    }

    impl FakeUpstream {
        pub fn put(&self, dataset: &str, value: Value) {
            self.values.lock().unwrap().insert(dataset.to_string(), value);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn fetch(&self, key: &DatasetKey) -> Result<Value, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.values
                .lock()
                .unwrap()
                .get(key.dataset())
                .cloned()
                .ok_or_else(|| Error::Upstream(format!("{key} unavailable")))
        }
    }

    pub fn state(fallback: Arc<dyn FallbackSource>) -> (AppState, Arc<FakeUpstream>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let upstream = Arc::new(FakeUpstream::default());
        let store = CacheStore::new(NonZeroUsize::new(8).unwrap(), clock.clone());
        let policy = FetchPolicy { timeout: Duration::from_secs(1), max_retries: 0, retry_delay: Duration::ZERO };
        let origin = OriginService::new(
            Arc::new(store),
            FetchCoordinator::new(policy),
            upstream.clone(),
            fallback,
            TtlPolicy { default_secs: 60, overrides: BTreeMap::new() },
        );
        (AppState::new(Arc::new(origin), clock.clone(), 4), upstream, clock)
    }

    /// First text block of a tool result, as JSON.
    pub fn body(result: &rmcp::model::CallToolResult) -> Value {
        let text = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_hot_keys_parse() {
        let config = AppConfig::default();
        let keys = hot_keys(&config).unwrap();
        assert_eq!(keys.len(), config.hot_keys.len());
    }

    #[test]
    fn test_hot_keys_reject_malformed() {
        let config = AppConfig { hot_keys: vec!["matches:status".into()], ..AppConfig::default() };
        assert!(hot_keys(&config).is_err());
    }

    #[tokio::test]
    async fn test_missing_fallback_file_is_an_error() {
        let result = load_fallback(Some(Path::new("/nonexistent/tally-fallback.json"))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_no_fallback_file() {
        let fallback = load_fallback(None).await.unwrap();
        assert!(fallback.fallback_for(&"schedule".parse().unwrap()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_keeps_hot_keys_warm() {
        let (state, upstream, _) = state(Arc::new(NoFallback));
        upstream.put("schedule", json!({"fixtures": []}));
        let config = AppConfig { refresh_interval_ms: 1_000, ..AppConfig::default() };

        let scheduler = state.start_refresh(&config, vec!["schedule".parse().unwrap()]).unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(upstream.calls(), 2);
        assert!(state.origin.store().has("schedule"));
        assert_eq!(scheduler.stats().runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_refresh_interval_disables_refresh() {
        let (state, upstream, _) = state(Arc::new(NoFallback));
        upstream.put("schedule", json!([]));
        let config = AppConfig { refresh_interval_ms: 0, ..AppConfig::default() };

        let scheduler = state.start_refresh(&config, vec!["schedule".parse().unwrap()]);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(scheduler.is_none());
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_watch_stops_at_limit() {
        let (state, upstream, _) = state(Arc::new(NoFallback));
        upstream.put("matches", json!([]));

        let accepted = (0..20)
            .filter(|i| {
                let key: DatasetKey = format!("matches:team=t{i}").parse().unwrap();
                state.try_watch(&key, ConsumerPolicy::polling(Duration::from_secs(60)))
            })
            .count();
        assert_eq!(accepted, state.watch_limit);

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(state.consumer.keys().len(), state.watch_limit);
        // polls are served by the origin cache; only the mounts reach upstream
        assert_eq!(upstream.calls(), state.watch_limit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_loads_hot_keys() {
        let (state, upstream, _) = state(Arc::new(NoFallback));
        upstream.put("points-table", json!([]));
        let key: DatasetKey = "points-table".parse().unwrap();

        state.watch(std::slice::from_ref(&key), ConsumerPolicy::default());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(state.consumer.snapshot(&key).unwrap().value, Some(json!([])));
    }
}
