//! Per-key fetch deduplication with retry and timeout.
//!
//! ### Stampede protection
//! - At most one upstream fetch per key is in flight at any time.
//! - Callers arriving while a fetch runs attach to it and get the same result.
//! - The check for an existing fetch and the registration of a new one happen
//!   under one lock, before anything is awaited.
//!
//! ### Attempts
//! - Each attempt is a fresh upstream call raced against `timeout`.
//! - A timed-out call is detached, not aborted; its late result is dropped.
//! - Attempts are separated by a fixed `retry_delay`.
//!
//! The fetch runs on its own task, so a caller that goes away does not cancel
//! it for the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::Error;
use crate::config::AppConfig;
use crate::key::DatasetKey;
use crate::lock::mutex_lock;
use crate::upstream::Upstream;

const SOURCE: &str = "coordinator";

type SharedFetch = Shared<BoxFuture<'static, Result<Value, Error>>>;
type InFlightMap = Arc<Mutex<HashMap<String, InFlightFetch>>>;

struct InFlightFetch {
    started_at: Instant,
    result: SharedFetch,
}

/// Retry and timeout settings for upstream attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), max_retries: 2, retry_delay: Duration::from_secs(2) }
    }
}

impl FetchPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { timeout: config.timeout(), max_retries: config.max_retries, retry_delay: config.retry_delay() }
    }
}

/// Removes the in-flight entry however the fetch task ends.
struct InFlightGuard {
    map: InFlightMap,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        mutex_lock(&self.map, SOURCE, "release").remove(&self.key);
    }
}

pub struct FetchCoordinator {
    in_flight: InFlightMap,
    policy: FetchPolicy,
}

impl FetchCoordinator {
    pub fn new(policy: FetchPolicy) -> Self {
        Self { in_flight: Arc::new(Mutex::new(HashMap::new())), policy }
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    /// Fetch `key` from `upstream`, or wait on the fetch already running for it.
    ///
    /// # Errors
    ///
    /// Returns `Error::UpstreamUnavailable` once every attempt has failed.
    pub async fn fetch_or_join(&self, key: &DatasetKey, upstream: Arc<dyn Upstream>) -> Result<Value, Error> {
        let canonical = key.canonical();

        let shared = {
            let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "fetch_or_join");
            match in_flight.get(&canonical) {
                Some(existing) => {
                    tracing::debug!(
                        key = %canonical,
                        running_ms = existing.started_at.elapsed().as_millis() as u64,
                        "joined in-flight fetch"
                    );
                    existing.result.clone()
                }
                None => {
                    let guard = InFlightGuard { map: self.in_flight.clone(), key: canonical.clone() };
                    let task = tokio::spawn(run_attempts(key.clone(), upstream, self.policy, guard));
                    let result = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => Err(Error::Upstream(format!("fetch task failed: {e}"))),
                        }
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(canonical, InFlightFetch { started_at: Instant::now(), result: result.clone() });
                    result
                }
            }
        };

        shared.await
    }

    /// Keys with a fetch currently running.
    pub fn in_flight_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = mutex_lock(&self.in_flight, SOURCE, "in_flight_keys")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

async fn run_attempts(
    key: DatasetKey, upstream: Arc<dyn Upstream>, policy: FetchPolicy, _guard: InFlightGuard,
) -> Result<Value, Error> {
    let canonical = key.canonical();
    let max_attempts = policy.max_retries + 1;
    let started = Instant::now();
    let mut attempts = 0;
    let mut last_error = Error::Upstream("no attempt made".into());

    while attempts < max_attempts {
        if attempts > 0 {
            tokio::time::sleep(policy.retry_delay).await;
        }
        attempts += 1;

        let call = {
            let upstream = upstream.clone();
            let key = key.clone();
            tokio::spawn(async move { upstream.fetch(&key).await })
        };

        // On timeout the JoinHandle is dropped, which detaches the call.
        let outcome = match tokio::time::timeout(policy.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::Upstream(format!("upstream call panicked: {e}"))),
            Err(_) => Err(Error::UpstreamTimeout {
                key: canonical.clone(),
                timeout_ms: policy.timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(payload) => {
                tracing::info!(
                    key = %canonical,
                    attempt = attempts,
                    fetch_ms = started.elapsed().as_millis() as u64,
                    "upstream fetch succeeded"
                );
                return Ok(payload);
            }
            Err(e) => {
                tracing::warn!(key = %canonical, attempt = attempts, max_attempts, error = %e, "upstream attempt failed");
                let retryable = e.is_retryable();
                last_error = e;
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(Error::UpstreamUnavailable { key: canonical, attempts, last_error: last_error.to_string() })
}
