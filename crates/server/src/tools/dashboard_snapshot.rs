//! dashboard_snapshot tool implementation.
//!
//! Reads the consumer-tier view of a key. The first read of a key starts
//! watching it with the configured consumer policy, up to the server's watch
//! limit; past it, unwatched keys are refused.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tally_client::{ConsumerPolicy, Snapshot};
use tally_core::{DatasetKey, Error};

use super::json_success;
use crate::state::AppState;

/// Parameters for the dashboard_snapshot tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DashboardSnapshotParams {
    /// Dataset key, e.g. `points-table`.
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshotOutput {
    /// False if this call started watching the key.
    pub watched: bool,
    pub snapshot: Option<Snapshot>,
}

/// Implementation of the dashboard_snapshot tool.
pub fn snapshot_impl(
    state: &AppState, policy: ConsumerPolicy, params: DashboardSnapshotParams,
) -> Result<CallToolResult, McpError> {
    let key: DatasetKey = params.key.parse()?;

    let output = match state.consumer.snapshot(&key) {
        Some(snapshot) => DashboardSnapshotOutput { watched: true, snapshot: Some(snapshot) },
        None => {
            if !state.try_watch(&key, policy) {
                return Err(Error::InvalidInput(format!(
                    "watch limit of {} keys reached; use dataset_get for {key}",
                    state.watch_limit
                ))
                .into());
            }
            DashboardSnapshotOutput { watched: false, snapshot: state.consumer.snapshot(&key) }
        }
    };

    json_success(&output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{body, state};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tally_core::NoFallback;

    fn params(key: &str) -> DashboardSnapshotParams {
        DashboardSnapshotParams { key: key.into() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_read_starts_watching() {
        let (state, upstream, _) = state(Arc::new(NoFallback));
        upstream.put("matches", json!([{"id": 7}]));

        let first = body(&snapshot_impl(&state, ConsumerPolicy::default(), params("matches:status=live")).unwrap());
        assert_eq!(first["watched"], false);
        assert!(first["snapshot"]["value"].is_null());

        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = body(&snapshot_impl(&state, ConsumerPolicy::default(), params("matches:status=live")).unwrap());
        assert_eq!(second["watched"], true);
        assert_eq!(second["snapshot"]["value"], json!([{"id": 7}]));
        assert_eq!(second["snapshot"]["freshness"], "fresh");
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwatched_keys_refused_past_limit() {
        let (state, upstream, _) = state(Arc::new(NoFallback));
        upstream.put("matches", json!([]));

        let mut refused = 0;
        for i in 0..50 {
            let key = format!("matches:team=t{i}");
            if snapshot_impl(&state, ConsumerPolicy::polling(Duration::from_secs(1)), params(&key)).is_err() {
                refused += 1;
            }
        }
        assert_eq!(refused, 50 - state.watch_limit);
        assert_eq!(state.consumer.keys().len(), state.watch_limit);

        // keys already watched are still readable
        let out = body(&snapshot_impl(&state, ConsumerPolicy::default(), params("matches:team=t0")).unwrap());
        assert_eq!(out["watched"], true);

        let err = snapshot_impl(&state, ConsumerPolicy::default(), params("matches:team=t99")).unwrap_err();
        assert_eq!(err.code.0, -32602);
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let (state, _, _) = state(Arc::new(NoFallback));
        let err = snapshot_impl(&state, ConsumerPolicy::default(), params("")).unwrap_err();
        assert_eq!(err.code.0, -32602);
    }
}
