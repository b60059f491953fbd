//! Client side of tally.
//!
//! This crate provides:
//! - `HttpUpstream`, the reqwest adapter for the upstream data API
//! - `ConsumerCache`, the polling/revalidating presentation cache
//! - `ForceRefreshOrchestrator`, the cross-tier "refresh now" protocol

pub mod consumer;
pub mod fetch;
pub mod orchestrator;

pub use consumer::{ChangeKind, ConsumerCache, ConsumerPolicy, Snapshot, SnapshotChange, SubscriptionHandle, Trigger};
pub use fetch::{HttpUpstream, UpstreamConfig};
pub use orchestrator::{ForceRefreshOrchestrator, RefreshError, RefreshReport};
