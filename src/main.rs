//! `mcp-bridge [CONFIG]` — connect every configured MCP server and print what
//! the agent would see through the discovery tools.

use std::path::PathBuf;

use anyhow::Context;

use mcp_bridge::config::{find_config_path, load_config};
use mcp_bridge::mcp_client::discovery::{list_servers, list_tools};
use mcp_bridge::mcp_client::{McpClient, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let explicit = std::env::args_os().nth(1).map(PathBuf::from);

    let path = find_config_path(explicit.as_deref()).context("locating config")?;
    let config = load_config(&path).with_context(|| format!("loading {}", path.display()))?;

    mcp_bridge::init_tracing(&config.logging).context("initialising logging")?;
    tracing::info!(config = %path.display(), "using MCP server config");

    let client = McpClient::new(config.settings.clone()).context("creating MCP client")?;
    let mut registry = ToolRegistry::new(client);
    for (name, server) in config.active_servers() {
        registry
            .register_server(name, server.clone())
            .with_context(|| format!("registering server '{name}'"))?;
    }

    for (name, ok) in registry.connect_all().await {
        if !ok {
            tracing::warn!(server = %name, "server unavailable");
        }
    }

    println!("{}", list_servers(&registry).await?);
    println!("{}", list_tools(&registry, None).await?);

    registry.client().shutdown_all().await;
    Ok(())
}
