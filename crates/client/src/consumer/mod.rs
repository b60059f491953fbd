//! Consumer-tier cache.
//!
//! Keeps one snapshot per subscribed key and revalidates it against the
//! origin on a polling timer, on focus/reconnect events, and on demand.
//!
//! ### Revalidation
//! - Every trigger goes through `maybe_revalidate`.
//! - Automatic triggers are suppressed while a call for the key is running or
//!   if one completed within the dedup window.
//! - `mutate(.., true)` always calls the origin.
//! - Results of calls started before a `mutate` are discarded.
//!
//! ### Lifecycle
//! - Entries are reference-counted by subscription.
//! - The last `unsubscribe` drops the entry and its timer. Origin fetches
//!   already running are not cancelled.

pub mod policy;
pub mod snapshot;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use tally_core::freshness;
use tally_core::lock::mutex_lock;
use tally_core::{Clock, DatasetKey, Error, OriginService, Resolved, Source, Warning};

pub use policy::{ConsumerPolicy, Trigger};
pub use snapshot::{ChangeKind, Snapshot, SnapshotChange};

const SOURCE: &str = "consumer";
const CHANGE_CAPACITY: usize = 256;

/// Returned by `subscribe`; hand it back to `unsubscribe`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    key: String,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

struct Entry {
    key: DatasetKey,
    subscribers: HashMap<u64, ConsumerPolicy>,
    value: Option<Value>,
    error: Option<Error>,
    source: Option<Source>,
    warning: Option<Warning>,
    produced_at: Option<DateTime<Utc>>,
    last_fetch_at: Option<DateTime<Utc>>,
    last_completed: Option<Instant>,
    in_progress: u32,
    /// Sequence number of the latest revalidation started.
    started_seq: u64,
    /// Results of revalidations started at or before this are ignored.
    discard_upto: u64,
    /// Sequence number of the result currently shown.
    applied_seq: u64,
    poll_every: Duration,
    timer: Option<JoinHandle<()>>,
}

impl Entry {
    fn new(key: DatasetKey) -> Self {
        Self {
            key,
            subscribers: HashMap::new(),
            value: None,
            error: None,
            source: None,
            warning: None,
            produced_at: None,
            last_fetch_at: None,
            last_completed: None,
            in_progress: 0,
            started_seq: 0,
            discard_upto: 0,
            applied_seq: 0,
            poll_every: Duration::ZERO,
            timer: None,
        }
    }

    fn policy(&self) -> ConsumerPolicy {
        policy::merge(self.subscribers.values()).unwrap_or_default()
    }

    fn apply(&mut self, result: Result<Resolved, Error>) -> ChangeKind {
        match result {
            Ok(resolved) => {
                self.value = Some(resolved.payload);
                self.error = None;
                self.source = Some(resolved.source);
                self.warning = resolved.warning;
                self.produced_at = resolved.produced_at;
                ChangeKind::Updated
            }
            // the previous value stays visible next to the error
            Err(e) => {
                self.error = Some(e);
                ChangeKind::Failed
            }
        }
    }

    fn clear(&mut self) {
        self.value = None;
        self.error = None;
        self.source = None;
        self.warning = None;
        self.produced_at = None;
    }

    fn snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            key: self.key.canonical(),
            value: self.value.clone(),
            error: self.error.clone(),
            is_loading: self.in_progress > 0,
            freshness: self.produced_at.map(|at| freshness::classify(&self.key, now - at)),
            source: self.source,
            warning: self.warning.clone(),
            produced_at: self.produced_at,
            last_fetch_at: self.last_fetch_at,
        }
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner {
    origin: Arc<OriginService>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
    changes: broadcast::Sender<SnapshotChange>,
}

/// Presentation-side cache over an `OriginService`.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConsumerCache {
    inner: Arc<Inner>,
}

impl ConsumerCache {
    pub fn new(origin: Arc<OriginService>, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                origin,
                clock,
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                changes,
            }),
        }
    }

    /// Change notifications for every key.
    pub fn changes(&self) -> broadcast::Receiver<SnapshotChange> {
        self.inner.changes.subscribe()
    }

    /// Start watching `key`.
    ///
    /// If the key has no value yet, a first revalidation is started in the
    /// background.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime; the first revalidation and
    /// the polling timer are spawned onto it.
    pub fn subscribe(&self, key: &DatasetKey, policy: ConsumerPolicy) -> SubscriptionHandle {
        let (handle, needs_mount) = {
            let mut entries = mutex_lock(&self.inner.entries, SOURCE, "subscribe");
            self.attach(&mut entries, key, policy)
        };
        self.finish_subscribe(key, &handle, needs_mount);
        handle
    }

    /// Like `subscribe`, but refuses a key not already watched once
    /// `max_keys` keys are watched.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn try_subscribe(
        &self, key: &DatasetKey, policy: ConsumerPolicy, max_keys: usize,
    ) -> Option<SubscriptionHandle> {
        let (handle, needs_mount) = {
            let mut entries = mutex_lock(&self.inner.entries, SOURCE, "try_subscribe");
            if !entries.contains_key(&key.canonical()) && entries.len() >= max_keys {
                tracing::warn!(key = %key, max_keys, "watch limit reached; subscription refused");
                return None;
            }
            self.attach(&mut entries, key, policy)
        };
        self.finish_subscribe(key, &handle, needs_mount);
        Some(handle)
    }

    fn attach(
        &self, entries: &mut HashMap<String, Entry>, key: &DatasetKey, policy: ConsumerPolicy,
    ) -> (SubscriptionHandle, bool) {
        let canonical = key.canonical();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let entry = entries
            .entry(canonical.clone())
            .or_insert_with(|| Entry::new(key.clone()));
        entry.subscribers.insert(id, policy);
        self.inner.rearm(entry);
        let needs_mount = entry.value.is_none() && entry.in_progress == 0;

        (SubscriptionHandle { id, key: canonical }, needs_mount)
    }

    fn finish_subscribe(&self, key: &DatasetKey, handle: &SubscriptionHandle, needs_mount: bool) {
        tracing::debug!(key = %handle.key, subscription = handle.id, "subscribed");

        if needs_mount {
            let inner = self.inner.clone();
            let key = key.clone();
            tokio::spawn(async move {
                inner.maybe_revalidate(&key, Trigger::Mount).await;
            });
        }
    }

    /// Stop watching. Returns whether the handle was live.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed_entry = {
            let mut entries = mutex_lock(&self.inner.entries, SOURCE, "unsubscribe");
            let Some(entry) = entries.get_mut(&handle.key) else {
                return false;
            };
            if entry.subscribers.remove(&handle.id).is_none() {
                return false;
            }
            if entry.subscribers.is_empty() {
                entries.remove(&handle.key)
            } else {
                self.inner.rearm(entry);
                None
            }
        };

        tracing::debug!(key = %handle.key, subscription = handle.id, "unsubscribed");

        if removed_entry.is_some() {
            drop(removed_entry);
            self.inner.emit(&handle.key, ChangeKind::Removed);
        }
        true
    }

    /// Change the local snapshot and optionally revalidate.
    ///
    /// - `None, false`: drop the local value, no network call.
    /// - `Some(v), false`: show `v` locally.
    /// - `_, true`: revalidate now, ignoring the dedup window.
    ///
    /// Results of revalidations started before this call are discarded.
    /// Returns false if nobody is subscribed to `key`.
    pub async fn mutate(&self, key: &DatasetKey, value: Option<Value>, revalidate: bool) -> bool {
        let canonical = key.canonical();
        let change = {
            let mut entries = mutex_lock(&self.inner.entries, SOURCE, "mutate");
            let Some(entry) = entries.get_mut(&canonical) else {
                tracing::debug!(key = %canonical, "mutate on unsubscribed key ignored");
                return false;
            };
            entry.discard_upto = entry.started_seq;
            match value {
                Some(v) => {
                    entry.value = Some(v);
                    entry.error = None;
                    Some(ChangeKind::Mutated)
                }
                None if !revalidate => {
                    entry.clear();
                    Some(ChangeKind::Cleared)
                }
                None => None,
            }
        };

        if let Some(kind) = change {
            self.inner.emit(&canonical, kind);
        }
        if revalidate {
            self.inner.maybe_revalidate(key, Trigger::Mutate).await;
        }
        true
    }

    /// Revalidate `key` if `trigger` is allowed to. Returns whether the origin was called.
    pub async fn maybe_revalidate(&self, key: &DatasetKey, trigger: Trigger) -> bool {
        self.inner.maybe_revalidate(key, trigger).await
    }

    /// Window regained focus.
    pub async fn on_focus(&self) -> usize {
        self.inner
            .revalidate_where(Trigger::Focus, |p| p.revalidate_on_focus)
            .await
    }

    /// Network came back.
    pub async fn on_reconnect(&self) -> usize {
        self.inner
            .revalidate_where(Trigger::Reconnect, |p| p.revalidate_on_reconnect)
            .await
    }

    pub fn snapshot(&self, key: &DatasetKey) -> Option<Snapshot> {
        let now = self.inner.clock.now();
        mutex_lock(&self.inner.entries, SOURCE, "snapshot")
            .get(&key.canonical())
            .map(|entry| entry.snapshot(now))
    }

    pub fn subscriber_count(&self, key: &DatasetKey) -> usize {
        mutex_lock(&self.inner.entries, SOURCE, "subscriber_count")
            .get(&key.canonical())
            .map_or(0, |entry| entry.subscribers.len())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = mutex_lock(&self.inner.entries, SOURCE, "keys")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl Inner {
    fn emit(&self, key: &str, kind: ChangeKind) {
        // no receivers is fine
        let _ = self.changes.send(SnapshotChange { key: key.to_string(), kind });
    }

    /// Re-arm the polling timer if the effective interval changed.
    fn rearm(self: &Arc<Self>, entry: &mut Entry) {
        let every = entry.policy().refresh_interval;
        if every == entry.poll_every && (entry.timer.is_some() || every.is_zero()) {
            return;
        }

        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        entry.poll_every = every;
        if every.is_zero() {
            return;
        }

        let weak = Arc::downgrade(self);
        let key = entry.key.clone();
        entry.timer = Some(tokio::spawn(poll(weak, key, every)));
    }

    async fn maybe_revalidate(&self, key: &DatasetKey, trigger: Trigger) -> bool {
        let canonical = key.canonical();

        let seq = {
            let mut entries = mutex_lock(&self.entries, SOURCE, "maybe_revalidate.start");
            let Some(entry) = entries.get_mut(&canonical) else {
                return false;
            };

            if trigger.respects_dedup() {
                if entry.in_progress > 0 {
                    tracing::debug!(key = %canonical, ?trigger, "revalidation already running; skipped");
                    return false;
                }
                let window = entry.policy().deduping_interval;
                if let Some(done) = entry.last_completed
                    && done.elapsed() < window
                {
                    tracing::debug!(key = %canonical, ?trigger, "inside dedup window; skipped");
                    return false;
                }
            }

            entry.in_progress += 1;
            entry.started_seq += 1;
            entry.started_seq
        };

        self.emit(&canonical, ChangeKind::Loading);
        tracing::debug!(key = %canonical, ?trigger, seq, "revalidating");

        let result = self.origin.resolve(key, false).await;

        let change = {
            let mut entries = mutex_lock(&self.entries, SOURCE, "maybe_revalidate.finish");
            let Some(entry) = entries.get_mut(&canonical) else {
                return true;
            };
            entry.in_progress = entry.in_progress.saturating_sub(1);
            entry.last_completed = Some(Instant::now());
            entry.last_fetch_at = Some(self.clock.now());

            if seq <= entry.discard_upto || seq < entry.applied_seq {
                tracing::debug!(key = %canonical, seq, "superseded revalidation result discarded");
                None
            } else {
                entry.applied_seq = seq;
                Some(entry.apply(result))
            }
        };

        if let Some(kind) = change {
            self.emit(&canonical, kind);
        }
        true
    }

    async fn revalidate_where(&self, trigger: Trigger, wants: impl Fn(&ConsumerPolicy) -> bool) -> usize {
        let keys: Vec<DatasetKey> = mutex_lock(&self.entries, SOURCE, "revalidate_where")
            .values()
            .filter(|entry| wants(&entry.policy()))
            .map(|entry| entry.key.clone())
            .collect();

        let results =
            futures_util::future::join_all(keys.iter().map(|key| self.maybe_revalidate(key, trigger))).await;
        results.into_iter().filter(|called| *called).count()
    }
}

async fn poll(weak: Weak<Inner>, key: DatasetKey, every: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.maybe_revalidate(&key, Trigger::Tick).await;
    }
}
