//! Capabilities the origin tier consumes but does not implement.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::Error;
use crate::key::DatasetKey;

/// The slow, failure-prone data source.
///
/// Implementations may take seconds and may fail transiently; retries and
/// deduplication are the coordinator's job, not theirs.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, key: &DatasetKey) -> Result<Value, Error>;
}

/// Deterministic substitute data, consulted only when nothing else is left.
pub trait FallbackSource: Send + Sync {
    fn fallback_for(&self, key: &DatasetKey) -> Option<Value>;
}

/// Never has anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFallback;

impl FallbackSource for NoFallback {
    fn fallback_for(&self, _key: &DatasetKey) -> Option<Value> {
        None
    }
}

/// Fixed datasets keyed by request filter.
///
/// Looks up the exact canonical key first, then the bare dataset name, so a
/// single `matches` entry covers every `matches:*` filter that has no entry
/// of its own.
#[derive(Debug, Default, Clone)]
pub struct StaticFallback {
    datasets: HashMap<String, Value>,
}

impl StaticFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &DatasetKey, payload: Value) -> Self {
        self.datasets.insert(key.canonical(), payload);
        self
    }

    /// Build from a JSON object of `key -> payload`.
    pub fn from_json(value: Value) -> Result<Self, Error> {
        let Value::Object(map) = value else {
            return Err(Error::InvalidInput("fallback datasets must be a JSON object".into()));
        };
        let mut datasets = HashMap::with_capacity(map.len());
        for (raw, payload) in map {
            let key: DatasetKey = raw.parse()?;
            datasets.insert(key.canonical(), payload);
        }
        Ok(Self { datasets })
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

impl FallbackSource for StaticFallback {
    fn fallback_for(&self, key: &DatasetKey) -> Option<Value> {
        self.datasets
            .get(&key.canonical())
            .or_else(|| self.datasets.get(key.dataset()))
            .cloned()
    }
}
