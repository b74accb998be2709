//! Discovery tools — let the agent enumerate servers and tools at runtime.
//!
//! Two synthetic tools are exposed next to the server-provided ones:
//! - `mcp_list_servers`: every configured server with transport, live status
//!   and tool count (errored and disconnected servers included)
//! - `mcp_list_tools`: qualified tool names and descriptions, for one server
//!   or all of them

use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;

use super::errors::McpError;
use super::registry::{qualified_name, CallableTool, ToolHandler, ToolRegistry};
use super::schema::ToolSchema;

/// Server name that would collide with the discovery tool names.
pub const RESERVED_SERVER_NAME: &str = "mcp";

pub const LIST_SERVERS_TOOL: &str = "mcp_list_servers";
pub const LIST_TOOLS_TOOL: &str = "mcp_list_tools";

/// One row of `mcp_list_tools` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub server: String,
    pub description: String,
}

/// Build both discovery tools over `registry`.
pub fn discovery_tools(registry: &ToolRegistry) -> Vec<CallableTool> {
    let servers_registry = registry.clone();
    let list_servers_handler: ToolHandler = Arc::new(move |_args| {
        let registry = servers_registry.clone();
        async move { list_servers(&registry).await }.boxed()
    });

    let tools_registry = registry.clone();
    let list_tools_handler: ToolHandler = Arc::new(move |args| {
        let registry = tools_registry.clone();
        async move {
            let server = args.get("server").and_then(|s| s.as_str());
            list_tools(&registry, server).await
        }
        .boxed()
    });

    vec![
        CallableTool::new(
            LIST_SERVERS_TOOL.to_string(),
            "List all configured MCP servers with their transport, connection status \
             and number of tools."
                .to_string(),
            ToolSchema::default(),
            list_servers_handler,
        ),
        CallableTool::new(
            LIST_TOOLS_TOOL.to_string(),
            "List the tools available from one MCP server, or from all servers when \
             no server is given."
                .to_string(),
            ToolSchema::translate(&serde_json::json!({
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Server name. Omit to list tools from every server."
                    }
                }
            })),
            list_tools_handler,
        ),
    ]
}

/// Render the server summary as pretty JSON.
pub async fn list_servers(registry: &ToolRegistry) -> Result<String, McpError> {
    let snapshots = registry.server_snapshots().await;
    render(&snapshots)
}

/// Render the tool summary as pretty JSON, optionally for one server only.
pub async fn list_tools(registry: &ToolRegistry, server: Option<&str>) -> Result<String, McpError> {
    if let Some(name) = server {
        if registry.server_config(name).is_none() {
            return Err(McpError::UnknownServer {
                name: name.to_string(),
            });
        }
    }

    let summaries: Vec<ToolSummary> = registry
        .server_tools()
        .await
        .into_iter()
        .filter(|(name, _)| server.map_or(true, |wanted| wanted == name))
        .flat_map(|(name, tools)| {
            tools.into_iter().map(move |tool| ToolSummary {
                name: qualified_name(&name, &tool.name),
                server: name.clone(),
                description: tool.description,
            })
        })
        .collect();

    render(&summaries)
}

fn render<T: Serialize>(value: &T) -> Result<String, McpError> {
    serde_json::to_string_pretty(value).map_err(|e| McpError::RenderFailed {
        what: "discovery output".to_string(),
        reason: e.to_string(),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::client::tests::test_client;
    use crate::mcp_client::http::tests::{mcp_handler, spawn_stub};
    use crate::mcp_client::types::ServerConfig;
    use serde_json::json;

    async fn registry_with_one_live_server() -> ToolRegistry {
        let (url, _) = spawn_stub(mcp_handler()).await;
        let mut registry = ToolRegistry::new(test_client());
        registry.register_server("remote", ServerConfig::http(&url)).unwrap();
        registry
            .register_server("events", serde_json::from_value(json!({"transportKind": "sse"})).unwrap())
            .unwrap();
        registry
            .register_server("idle", ServerConfig::stdio("toolsrv", &[]))
            .unwrap();
        registry.connect("remote").await.unwrap();
        registry.connect("events").await.unwrap();
        registry
    }

    fn tool<'a>(tools: &'a [CallableTool], name: &str) -> &'a CallableTool {
        tools.iter().find(|t| t.name == name).unwrap()
    }

    #[tokio::test]
    async fn test_list_servers_reports_every_configured_server() {
        let registry = registry_with_one_live_server().await;
        let tools = registry.callable_tools().await;

        let out = tool(&tools, LIST_SERVERS_TOOL).invoke(json!({})).await;
        let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 3);

        // Sorted by name: events, idle, remote.
        assert_eq!(rows[0]["name"], "events");
        assert_eq!(rows[0]["transport"], "sse");
        assert_eq!(rows[0]["status"], "error");
        assert_eq!(rows[0]["toolCount"], 0);
        assert!(rows[0]["error"].as_str().unwrap().contains("unsupported"));

        assert_eq!(rows[1]["name"], "idle");
        assert_eq!(rows[1]["status"], "disconnected");

        assert_eq!(rows[2]["name"], "remote");
        assert_eq!(rows[2]["transport"], "http");
        assert_eq!(rows[2]["status"], "connected");
        assert_eq!(rows[2]["toolCount"], 1);
        assert!(rows[2]["connectedAt"].is_string());
    }

    #[tokio::test]
    async fn test_list_tools_all_and_filtered() {
        let registry = registry_with_one_live_server().await;
        let tools = registry.callable_tools().await;
        let list_tools = tool(&tools, LIST_TOOLS_TOOL);

        let all: serde_json::Value =
            serde_json::from_str(&list_tools.invoke(json!({})).await).unwrap();
        assert_eq!(
            all,
            json!([{"name": "remote_search", "server": "remote", "description": "Search the index"}])
        );

        let idle: serde_json::Value =
            serde_json::from_str(&list_tools.invoke(json!({"server": "idle"})).await).unwrap();
        assert_eq!(idle, json!([]));

        let out = list_tools.invoke(json!({"server": "nope"})).await;
        assert_eq!(out, "Error calling mcp_list_tools: unknown server: 'nope'");

        let out = list_tools.invoke(json!({"server": 5})).await;
        assert!(out.contains("field 'server' must be string"));
    }

    #[test]
    fn test_unrenderable_summary_reports_render_failure() {
        // Non-string map keys cannot be rendered as JSON.
        let unrenderable = std::collections::BTreeMap::from([((1, 2), "pair")]);
        let err = render(&unrenderable).unwrap_err();
        assert!(matches!(err, McpError::RenderFailed { .. }));
        assert!(err.to_string().starts_with("failed to render discovery output: "));
    }

    #[tokio::test]
    async fn test_discovery_tools_on_empty_registry() {
        let registry = ToolRegistry::new(test_client());
        assert_eq!(list_servers(&registry).await.unwrap(), "[]");
        assert_eq!(list_tools(&registry, None).await.unwrap(), "[]");
    }
}
