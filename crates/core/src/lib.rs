//! Core types and the origin tier for tally.
//!
//! This crate provides:
//! - In-memory TTL cache with stale-serving fallback
//! - Per-key fetch deduplication with retry and timeout
//! - The origin request facade and its fallback chain
//! - Conditional (ETag) responses
//! - Background refresh scheduling
//! - Unified error types and configuration

pub mod cache;
pub mod clock;
pub mod conditional;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod freshness;
pub mod key;
pub mod lock;
pub mod origin;
pub mod scheduler;
pub mod upstream;

pub use cache::{CacheRecord, CacheStats, CacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conditional::{ConditionalResponder, ConditionalResponse, Envelope, Tagged};
pub use config::{AppConfig, ConfigError};
pub use coordinator::{FetchCoordinator, FetchPolicy};
pub use error::Error;
pub use freshness::{FreshnessCategory, FreshnessClass};
pub use key::DatasetKey;
pub use origin::{OriginService, OriginStats, Resolved, Source, TtlPolicy, Warning, WarningKind};
pub use scheduler::RefreshScheduler;
pub use upstream::{FallbackSource, NoFallback, StaticFallback, Upstream};
