//! In-memory TTL store for the origin tier.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::{CacheEvent, CacheObserver};
use super::hash::content_hash;
use crate::clock::Clock;
use crate::lock::mutex_lock;

const SOURCE: &str = "cache::store";

/// One cached dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub payload: Value,
    pub produced_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub content_hash: String,
}

impl CacheRecord {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.produced_at
    }

    /// Expired once strictly older than its TTL. Expired records are still
    /// served as a fallback; expiry never deletes.
    ///
    /// A TTL beyond what `chrono::Duration` can hold never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match i64::try_from(self.ttl_secs).ok().and_then(Duration::try_seconds) {
            Some(ttl) => self.age(now) > ttl,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheStats {
    pub count: usize,
    pub capacity: usize,
    pub keys: Vec<String>,
}

/// Key → record store with bounded size.
///
/// Reads never reorder entries, so the least-recent slot is always the record
/// written longest ago; that one goes first when capacity is exceeded.
pub struct CacheStore {
    records: Mutex<LruCache<String, CacheRecord>>,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn CacheObserver>>,
}

impl CacheStore {
    pub fn new(capacity: NonZeroUsize, clock: Arc<dyn Clock>) -> Self {
        Self { records: Mutex::new(LruCache::new(capacity)), clock, observers: Vec::new() }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn notify(&self, event: CacheEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current record for `key`, expired or not.
    pub fn get(&self, key: &str) -> Option<CacheRecord> {
        mutex_lock(&self.records, SOURCE, "get").peek(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        mutex_lock(&self.records, SOURCE, "has").contains(key)
    }

    /// Write `payload` under `key`, replacing any existing record.
    pub fn set(&self, key: &str, payload: Value, ttl_secs: u64) -> CacheRecord {
        let record = CacheRecord {
            key: key.to_string(),
            content_hash: content_hash(&payload),
            payload,
            produced_at: self.clock.now(),
            ttl_secs,
        };

        let displaced = mutex_lock(&self.records, SOURCE, "set").push(key.to_string(), record.clone());

        let replaced = matches!(&displaced, Some((k, _)) if k == key);
        self.notify(CacheEvent::Set {
            key: record.key.clone(),
            content_hash: record.content_hash.clone(),
            produced_at: record.produced_at,
            replaced,
        });
        if let Some((evicted, _)) = displaced
            && evicted != key
        {
            self.notify(CacheEvent::Evicted { key: evicted });
        }

        record
    }

    /// Remove the record for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = mutex_lock(&self.records, SOURCE, "invalidate").pop(key).is_some();
        if removed {
            self.notify(CacheEvent::Invalidated { key: key.to_string() });
        }
        removed
    }

    /// Drop every expired record. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let purged: Vec<String> = {
            let mut records = mutex_lock(&self.records, SOURCE, "purge_expired");
            let expired: Vec<String> = records
                .iter()
                .filter(|(_, r)| r.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                records.pop(key);
            }
            expired
        };

        for key in &purged {
            self.notify(CacheEvent::Purged { key: key.clone() });
        }
        purged.len()
    }

    pub fn stats(&self) -> CacheStats {
        let records = mutex_lock(&self.records, SOURCE, "stats");
        let mut keys: Vec<String> = records.iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        CacheStats { count: records.len(), capacity: records.cap().get(), keys }
    }
}
