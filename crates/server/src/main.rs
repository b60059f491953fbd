//! tally server entry point.
//!
//! Boots both cache tiers, keeps the configured hot keys warm, and serves the
//! MCP tools on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tally_client::ConsumerPolicy;
use tally_core::AppConfig;
use tracing_subscriber::EnvFilter;

mod handler;
mod state;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let hot_keys = state::hot_keys(&config)?;
    let policy = ConsumerPolicy::from_config(&config);

    let state = Arc::new(state::AppState::from_config(&config).await?);
    state.watch(&hot_keys, policy);
    let mut refresher = state.start_refresh(&config, hot_keys);

    tracing::info!(refresh_ms = config.refresh_interval_ms, "Starting tally server on stdio transport");

    let handler = handler::TallyServer::new(state, policy);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;
    if let Some(refresher) = refresher.as_mut() {
        refresher.stop();
    }

    Ok(())
}
