//! Store notifications.
//!
//! `CacheStore` reports every write and removal to its observers, which keeps
//! logging and metrics out of the store itself.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A record was written. `replaced` is true when it overwrote one.
    Set { key: String, content_hash: String, produced_at: DateTime<Utc>, replaced: bool },
    /// Removed by an explicit invalidation.
    Invalidated { key: String },
    /// Removed to stay within capacity.
    Evicted { key: String },
    /// Removed by `purge_expired`.
    Purged { key: String },
}

impl CacheEvent {
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Set { key, .. }
            | CacheEvent::Invalidated { key }
            | CacheEvent::Evicted { key }
            | CacheEvent::Purged { key } => key,
        }
    }
}

pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

/// Logs every store event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CacheObserver for TracingObserver {
    fn on_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::Set { key, content_hash, replaced, .. } => {
                tracing::debug!(key = %key, hash = %&content_hash[..12.min(content_hash.len())], replaced, "cache set");
            }
            CacheEvent::Invalidated { key } => tracing::info!(key = %key, "cache invalidated"),
            CacheEvent::Evicted { key } => tracing::info!(key = %key, "cache evicted oldest record"),
            CacheEvent::Purged { key } => tracing::debug!(key = %key, "cache purged expired record"),
        }
    }
}
