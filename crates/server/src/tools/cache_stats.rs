//! cache_stats tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};

use super::json_success;
use crate::state::AppState;

/// Origin store contents plus keys with a fetch in flight.
pub fn stats_impl(state: &AppState) -> Result<CallToolResult, McpError> {
    json_success(&state.origin.stats())
}
