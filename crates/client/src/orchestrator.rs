//! Cross-tier "refresh now".
//!
//! Runs three ordered phases over a set of keys:
//! 1. clear the consumer snapshots locally,
//! 2. force the origin to drop and refetch every key (concurrently),
//! 3. revalidate the consumer snapshots through the updated origin.
//!
//! Phase 2 failures are collected per key and reported. They never abort the
//! batch, and phase 3 always runs so consumers show whatever the origin holds.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tally_core::{DatasetKey, Error, OriginService, Source};

use crate::consumer::ConsumerCache;

/// Why a key did not get fresh data in phase 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefreshError {
    /// Upstream failed and there was nothing to serve.
    NoDataAvailable,
    /// Upstream failed; old or substitute data is still being shown.
    Degraded { source: Source },
    Failed { message: String },
}

impl From<Error> for RefreshError {
    fn from(err: Error) -> Self {
        match err {
            Error::NoDataAvailable(_) => RefreshError::NoDataAvailable,
            other => RefreshError::Failed { message: other.to_string() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    /// True only if every key got fresh data in phase 2.
    pub success: bool,
    pub per_key_errors: BTreeMap<String, RefreshError>,
    /// Phase 2 source per key that resolved at all.
    pub outcomes: BTreeMap<String, Source>,
}

impl RefreshReport {
    /// The batch failure as a unified error, if any key failed.
    pub fn as_error(&self) -> Option<Error> {
        if self.success {
            None
        } else {
            Some(Error::PartialForceRefreshFailure { failed: self.per_key_errors.keys().cloned().collect() })
        }
    }
}

pub struct ForceRefreshOrchestrator {
    origin: Arc<OriginService>,
    consumer: ConsumerCache,
}

impl ForceRefreshOrchestrator {
    pub fn new(origin: Arc<OriginService>, consumer: ConsumerCache) -> Self {
        Self { origin, consumer }
    }

    /// Refresh `keys` across both tiers.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `keys` is empty. Per-key failures are
    /// reported in the returned `RefreshReport`.
    pub async fn run(&self, keys: &[DatasetKey]) -> Result<RefreshReport, Error> {
        if keys.is_empty() {
            return Err(Error::InvalidInput("no keys to refresh".to_string()));
        }

        // one pass per canonical key
        let keys: Vec<DatasetKey> = keys
            .iter()
            .map(|k| (k.canonical(), k.clone()))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect();

        tracing::info!(keys = keys.len(), "force refresh started");

        for key in &keys {
            self.consumer.mutate(key, None, false).await;
        }

        let results =
            futures_util::future::join_all(keys.iter().map(|key| self.origin.resolve(key, true))).await;

        let mut per_key_errors = BTreeMap::new();
        let mut outcomes = BTreeMap::new();
        for (key, result) in keys.iter().zip(results) {
            let canonical = key.canonical();
            match result {
                Ok(resolved) => {
                    outcomes.insert(canonical.clone(), resolved.source);
                    if !matches!(resolved.source, Source::Fresh | Source::Cache) {
                        tracing::warn!(key = %canonical, source = %resolved.source, "force refresh served degraded data");
                        per_key_errors.insert(canonical, RefreshError::Degraded { source: resolved.source });
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %canonical, error = %e, "force refresh failed");
                    per_key_errors.insert(canonical, e.into());
                }
            }
        }

        for key in &keys {
            self.consumer.mutate(key, None, true).await;
        }

        let report = RefreshReport { success: per_key_errors.is_empty(), per_key_errors, outcomes };
        match report.as_error() {
            None => tracing::info!(keys = keys.len(), "force refresh finished"),
            Some(e) => tracing::warn!(error = %e, "force refresh finished with failures"),
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ChangeKind, ConsumerPolicy, SnapshotChange};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::num::NonZeroUsize;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tally_core::cache::{CacheEvent, CacheObserver};
    use tally_core::{CacheStore, FetchCoordinator, FetchPolicy, ManualClock, NoFallback, StaticFallback, TtlPolicy, Upstream};

    /// Returns the current value for each dataset, or fails for datasets without one.
    #[derive(Default)]
    struct Board {
        values: Mutex<BTreeMap<String, Value>>,
        calls: AtomicUsize,
    }

    impl Board {
        fn put(&self, dataset: &str, value: Value) {
            self.values.lock().unwrap().insert(dataset.to_string(), value);
        }
    }

    #[async_trait]
    impl Upstream for Board {
        async fn fetch(&self, key: &DatasetKey) -> Result<Value, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.values
                .lock()
                .unwrap()
                .get(key.dataset())
                .cloned()
                .ok_or_else(|| Error::Upstream(format!("{key} unavailable")))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl CacheObserver for Recorder {
        fn on_event(&self, event: &CacheEvent) {
            let label = match event {
                CacheEvent::Set { .. } => "set",
                CacheEvent::Invalidated { .. } => "invalidated",
                CacheEvent::Evicted { .. } => "evicted",
                CacheEvent::Purged { .. } => "purged",
            };
            self.0.lock().unwrap().push(format!("{label}:{}", event.key()));
        }
    }

    struct Harness {
        orchestrator: ForceRefreshOrchestrator,
        consumer: ConsumerCache,
        board: Arc<Board>,
        events: Arc<Recorder>,
        clock: Arc<ManualClock>,
    }

    fn harness(fallback: Arc<dyn tally_core::FallbackSource>) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let board = Arc::new(Board::default());
        let events = Arc::new(Recorder::default());
        let store = CacheStore::new(NonZeroUsize::new(16).unwrap(), clock.clone()).with_observer(events.clone());
        let policy = FetchPolicy { timeout: Duration::from_secs(5), max_retries: 0, retry_delay: Duration::ZERO };
        let origin = Arc::new(OriginService::new(
            Arc::new(store),
            FetchCoordinator::new(policy),
            board.clone(),
            fallback,
            TtlPolicy { default_secs: 300, overrides: BTreeMap::new() },
        ));
        let consumer = ConsumerCache::new(origin.clone(), clock.clone());
        Harness {
            orchestrator: ForceRefreshOrchestrator::new(origin, consumer.clone()),
            consumer,
            board,
            events,
            clock,
        }
    }

    fn manual() -> ConsumerPolicy {
        ConsumerPolicy {
            refresh_interval: Duration::ZERO,
            revalidate_on_focus: false,
            revalidate_on_reconnect: false,
            deduping_interval: Duration::from_secs(2),
        }
    }

    fn key(s: &str) -> DatasetKey {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_points_table_end_to_end() {
        let h = harness(Arc::new(NoFallback));
        let k = key("points-table");

        h.board.put("points-table", json!({"rows": "A"}));
        let _sub = h.consumer.subscribe(&k, manual());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.consumer.snapshot(&k).unwrap().value, Some(json!({"rows": "A"})));

        // A is now past its TTL
        h.clock.advance(chrono::Duration::seconds(400));
        h.board.put("points-table", json!({"rows": "B"}));
        h.events.0.lock().unwrap().clear();
        let before = h.board.calls.load(Ordering::SeqCst);
        let mut changes = h.consumer.changes();

        let report = h.orchestrator.run(&[k.clone()]).await.unwrap();

        assert!(report.success);
        assert!(report.per_key_errors.is_empty());
        assert_eq!(report.outcomes.get("points-table"), Some(&Source::Fresh));
        assert!(report.as_error().is_none());

        let mut kinds = Vec::new();
        while let Ok(SnapshotChange { kind, .. }) = changes.try_recv() {
            kinds.push(kind);
        }
        assert_eq!(kinds, vec![ChangeKind::Cleared, ChangeKind::Loading, ChangeKind::Updated]);

        assert_eq!(
            *h.events.0.lock().unwrap(),
            vec!["invalidated:points-table".to_string(), "set:points-table".to_string()]
        );

        let snapshot = h.consumer.snapshot(&k).unwrap();
        assert_eq!(snapshot.value, Some(json!({"rows": "B"})));
        assert_eq!(snapshot.source, Some(Source::Cache));
        // phase 3 read through the repopulated cache
        assert_eq!(h.board.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_failure() {
        let h = harness(Arc::new(NoFallback));
        let (a, b) = (key("a"), key("b"));
        h.board.put("a", json!([1, 2, 3]));

        let _sa = h.consumer.subscribe(&a, manual());
        let _sb = h.consumer.subscribe(&b, manual());
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.board.put("a", json!([4, 5, 6]));

        let report = h.orchestrator.run(&[a.clone(), b.clone()]).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.per_key_errors.len(), 1);
        assert_eq!(report.per_key_errors.get("b"), Some(&RefreshError::NoDataAvailable));
        assert_eq!(report.as_error(), Some(Error::PartialForceRefreshFailure { failed: vec!["b".into()] }));

        assert_eq!(h.consumer.snapshot(&a).unwrap().value, Some(json!([4, 5, 6])));
        let snapshot_b = h.consumer.snapshot(&b).unwrap();
        assert!(snapshot_b.value.is_none());
        assert!(matches!(snapshot_b.error, Some(Error::NoDataAvailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_counts_as_degraded() {
        let fallback = StaticFallback::new().with(&key("schedule"), json!({"fixtures": []}));
        let h = harness(Arc::new(fallback));

        let report = h.orchestrator.run(&[key("schedule")]).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.outcomes.get("schedule"), Some(&Source::Fallback));
        assert_eq!(
            report.per_key_errors.get("schedule"),
            Some(&RefreshError::Degraded { source: Source::Fallback })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_keys_refreshed_once() {
        let h = harness(Arc::new(NoFallback));
        h.board.put("matches", json!([]));

        let report = h
            .orchestrator
            .run(&[key("matches:team=csk,status=live"), key("matches:status=live,team=csk")])
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(h.board.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_keys_rejected() {
        let h = harness(Arc::new(NoFallback));
        let err = h.orchestrator.run(&[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_refresh_error_serialization() {
        let json = serde_json::to_value(RefreshError::Degraded { source: Source::StaleCache }).unwrap();
        assert_eq!(json, json!({"kind": "degraded", "source": "stale-cache"}));
    }
}
