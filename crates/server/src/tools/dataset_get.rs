//! dataset_get tool implementation.
//!
//! Serves a dataset through the origin tier, honoring `if_none_match`.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tally_core::DatasetKey;

use super::json_success;
use crate::state::AppState;

/// Parameters for the dataset_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatasetGetParams {
    /// Dataset key, e.g. `points-table` or `matches:status=live`.
    pub key: String,

    /// ETag from a previous response. A match returns `not_modified` with no data.
    #[serde(default)]
    pub if_none_match: Option<String>,

    /// Drop the cached record and refetch.
    #[serde(default)]
    pub force_refresh: bool,
}

/// Implementation of the dataset_get tool.
pub async fn get_impl(state: &AppState, params: DatasetGetParams) -> Result<CallToolResult, McpError> {
    let key: DatasetKey = params.key.parse()?;
    let resolved = state.origin.resolve(&key, params.force_refresh).await?;

    tracing::debug!(key = %key, source = %resolved.source, "dataset served");

    let response = state
        .responder
        .respond(resolved, params.if_none_match.as_deref(), state.clock.as_ref());
    json_success(&response)
}
