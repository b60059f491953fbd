//! dataset_refresh tool implementation.
//!
//! Runs the cross-tier force refresh for a batch of keys. Partial failure is
//! returned as an error result carrying the full per-key report.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tally_core::{DatasetKey, Error};

use super::json_content;
use crate::state::AppState;

/// Parameters for the dataset_refresh tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatasetRefreshParams {
    /// Keys to refresh together.
    pub keys: Vec<String>,
}

/// Implementation of the dataset_refresh tool.
pub async fn refresh_impl(state: &AppState, params: DatasetRefreshParams) -> Result<CallToolResult, McpError> {
    let keys = params
        .keys
        .iter()
        .map(|raw| raw.parse())
        .collect::<Result<Vec<DatasetKey>, Error>>()?;

    let report = state.orchestrator.run(&keys).await?;
    let content = json_content(&report)?;

    if report.success {
        Ok(CallToolResult::success(vec![content]))
    } else {
        Ok(CallToolResult::error(vec![content]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{body, state};
    use serde_json::json;
    use std::sync::Arc;
    use tally_core::NoFallback;

    #[tokio::test]
    async fn test_refresh_success() {
        let (state, upstream, _) = state(Arc::new(NoFallback));
        upstream.put("schedule", json!([]));

        let result = refresh_impl(&state, DatasetRefreshParams { keys: vec!["schedule".into()] })
            .await
            .unwrap();
        assert!(!result.is_error.unwrap_or(false));

        let out = body(&result);
        assert_eq!(out["success"], true);
        assert_eq!(out["outcomes"]["schedule"], "fresh");
    }

    #[tokio::test]
    async fn test_refresh_partial_failure_is_reported() {
        let (state, upstream, _) = state(Arc::new(NoFallback));
        upstream.put("a", json!(1));

        let result = refresh_impl(&state, DatasetRefreshParams { keys: vec!["a".into(), "b".into()] })
            .await
            .unwrap();
        assert!(result.is_error.unwrap_or(false));

        let out = body(&result);
        assert_eq!(out["success"], false);
        assert_eq!(out["per_key_errors"]["b"]["kind"], "no_data_available");
        assert!(out["per_key_errors"].get("a").is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejects_empty_batch() {
        let (state, _, _) = state(Arc::new(NoFallback));
        let err = refresh_impl(&state, DatasetRefreshParams { keys: vec![] }).await.unwrap_err();
        assert_eq!(err.code.0, -32602);
    }
}
