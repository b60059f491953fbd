//! MCP tool implementations.
//!
//! This module contains all tools exposed by the tally server.

pub mod cache_stats;
pub mod dashboard_snapshot;
pub mod dataset_get;
pub mod dataset_refresh;

pub use dashboard_snapshot::DashboardSnapshotParams;
pub use dataset_get::DatasetGetParams;
pub use dataset_refresh::DatasetRefreshParams;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;
use tally_core::Error;

/// Pretty JSON body for a tool result.
pub(crate) fn json_content<T: Serialize>(value: &T) -> Result<Content, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::InvalidInput(format!("failed to serialize output: {e}")))?;
    Ok(Content::text(json))
}

pub(crate) fn json_success<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![json_content(value)?]))
}
