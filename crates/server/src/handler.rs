//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::state::AppState;
use crate::tools::{
    DashboardSnapshotParams, DatasetGetParams, DatasetRefreshParams, cache_stats::stats_impl,
    dashboard_snapshot::snapshot_impl, dataset_get::get_impl, dataset_refresh::refresh_impl,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use tally_client::ConsumerPolicy;

/// The main MCP server handler for tally.
#[derive(Clone)]
pub struct TallyServer {
    tool_router: ToolRouter<Self>,
    state: Arc<AppState>,
    policy: ConsumerPolicy,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl TallyServer {
    /// Create a new server handler.
    ///
    /// `policy` is applied to keys first watched through `dashboard_snapshot`.
    pub fn new(state: Arc<AppState>, policy: ConsumerPolicy) -> Self {
        Self { tool_router: Self::tool_router(), state, policy }
    }

    /// Serve a dataset from the origin cache.
    #[tool(
        description = "Get a dataset (e.g. `points-table`, `matches:status=live`). Serves fresh cache, then upstream, then stale cache, then fallback data. Pass `if_none_match` with a previous etag to get `not_modified` when nothing changed."
    )]
    async fn dataset_get(&self, params: Parameters<DatasetGetParams>) -> Result<CallToolResult, McpError> {
        get_impl(&self.state, params.0).await
    }

    /// Force-refresh a batch of datasets across both cache tiers.
    #[tool(
        description = "Force a refetch of one or more datasets and update the dashboard view. Returns a per-key report; the result is flagged as an error if any key could not get fresh data."
    )]
    async fn dataset_refresh(&self, params: Parameters<DatasetRefreshParams>) -> Result<CallToolResult, McpError> {
        refresh_impl(&self.state, params.0).await
    }

    /// Read the dashboard's view of a dataset.
    #[tool(
        description = "Read the dashboard snapshot of a dataset: value, last error, loading state and freshness (fresh/stale/old). The first read starts watching the key."
    )]
    async fn dashboard_snapshot(&self, params: Parameters<DashboardSnapshotParams>) -> Result<CallToolResult, McpError> {
        snapshot_impl(&self.state, self.policy, params.0)
    }

    /// Report origin cache contents.
    #[tool(description = "Report origin cache size, capacity, cached keys and keys with an upstream fetch in flight.")]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        stats_impl(&self.state)
    }
}

impl ServerHandler for TallyServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "tally".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::state;
    use tally_core::NoFallback;

    #[test]
    fn test_lists_all_tools() {
        let (state, _, _) = state(Arc::new(NoFallback));
        let server = TallyServer::new(Arc::new(state), ConsumerPolicy::default());

        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["cache_stats", "dashboard_snapshot", "dataset_get", "dataset_refresh"]);
    }

    #[test]
    fn test_server_info() {
        let (state, _, _) = state(Arc::new(NoFallback));
        let server = TallyServer::new(Arc::new(state), ConsumerPolicy::default());
        assert_eq!(server.get_info().server_info.name, "tally");
    }
}
