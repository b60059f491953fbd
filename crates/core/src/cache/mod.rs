//! In-memory origin cache.
//!
//! This module provides the origin-side record store. It supports:
//!
//! - TTL classification without deletion (expired records remain as fallback)
//! - Content hashing of every payload on write
//! - Bounded size with oldest-write eviction
//! - Observer notifications on every mutation

pub mod events;
pub mod hash;
pub mod store;

pub use events::{CacheEvent, CacheObserver, TracingObserver};
pub use hash::{canonical_json, content_hash};
pub use store::{CacheRecord, CacheStats, CacheStore};
