//! Tool Registry — configured servers and the callable tools they expose.
//!
//! Every tool discovered on a connected server becomes a [`CallableTool`]
//! named `<server>_<tool>`, checked against its translated schema before the
//! call is routed through [`McpClient::call_tool`]. The two discovery tools
//! from [`super::discovery`] are appended to the same list.
//!
//! Callable tools are rebuilt from the client's current state on every
//! request, so they always reflect the latest discovery.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::client::{ConnectionStatus, McpClient, ServerSnapshot};
use super::discovery;
use super::errors::McpError;
use super::schema::ToolSchema;
use super::types::{ServerConfig, ToolDescriptor};

/// Async body of a callable tool. Receives validated arguments.
pub type ToolHandler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<String, McpError>> + Send + Sync>;

/// Fully qualified tool name: `<server>_<tool>`.
pub fn qualified_name(server_name: &str, tool_name: &str) -> String {
    format!("{server_name}_{tool_name}")
}

// ─── CallableTool ────────────────────────────────────────────────────────────

/// A tool as presented to the orchestration layer.
///
/// [`CallableTool::invoke`] never fails: every error comes back as an
/// `"Error calling <name>: …"` string so a broken tool cannot abort an
/// agent turn.
#[derive(Clone)]
pub struct CallableTool {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    handler: ToolHandler,
}

impl std::fmt::Debug for CallableTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallableTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl CallableTool {
    pub fn new(name: String, description: String, schema: ToolSchema, handler: ToolHandler) -> Self {
        Self {
            name,
            description,
            schema,
            handler,
        }
    }

    /// Validate `arguments`, run the tool and render the outcome as text.
    pub async fn invoke(&self, arguments: serde_json::Value) -> String {
        if let Err(reason) = self.schema.validate(&arguments) {
            let err = McpError::InvalidArguments {
                tool: self.name.clone(),
                reason,
            };
            tracing::debug!(tool = %self.name, error = %err, "rejected tool arguments");
            return format!("Error calling {}: {err}", self.name);
        }

        let arguments = if arguments.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            arguments
        };

        match (self.handler)(arguments).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %self.name, error = %e, "tool call failed");
                format!("Error calling {}: {e}", self.name)
            }
        }
    }

    /// Serialize into OpenAI function-calling format.
    pub fn to_openai_tool(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.schema.to_json_schema(),
            }
        })
    }
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Configured servers plus the client that connects them.
#[derive(Clone)]
pub struct ToolRegistry {
    client: McpClient,
    servers: BTreeMap<String, ServerConfig>,
}

impl ToolRegistry {
    /// Create an empty registry over `client`.
    pub fn new(client: McpClient) -> Self {
        Self {
            client,
            servers: BTreeMap::new(),
        }
    }

    pub fn client(&self) -> &McpClient {
        &self.client
    }

    /// Register a server config under a unique name.
    ///
    /// The name `mcp` is reserved: its tools would shadow the discovery
    /// tools.
    pub fn register_server(&mut self, name: &str, config: ServerConfig) -> Result<(), McpError> {
        if name == discovery::RESERVED_SERVER_NAME {
            return Err(McpError::ConfigError {
                reason: format!("server name '{name}' is reserved for the discovery tools"),
            });
        }
        if self.servers.contains_key(name) {
            return Err(McpError::DuplicateServer {
                name: name.to_string(),
            });
        }
        tracing::debug!(server = name, transport = %config.kind(), "registered MCP server");
        self.servers.insert(name.to_string(), config);
        Ok(())
    }

    /// Configured server names, sorted.
    pub fn server_names(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }

    pub fn server_config(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    /// Connect one configured server.
    pub async fn connect(&self, name: &str) -> Result<bool, McpError> {
        let config = self
            .servers
            .get(name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;
        Ok(self.client.connect(name, config.clone()).await)
    }

    /// Connect every configured server, one after another.
    pub async fn connect_all(&self) -> Vec<(String, bool)> {
        let results = self
            .client
            .connect_all(
                self.servers
                    .iter()
                    .map(|(name, config)| (name.clone(), config.clone())),
            )
            .await;
        let connected = results.iter().filter(|(_, ok)| *ok).count();
        tracing::info!(
            connected,
            total = results.len(),
            "MCP servers connected"
        );
        results
    }

    /// Status of every configured server.
    ///
    /// A server the client has no connection for is reported as
    /// disconnected with zero tools.
    pub async fn server_snapshots(&self) -> Vec<ServerSnapshot> {
        let mut snapshots = Vec::with_capacity(self.servers.len());
        for (name, config) in &self.servers {
            let snapshot = match self.client.snapshot(name).await {
                Some(snapshot) => snapshot,
                None => ServerSnapshot {
                    name: name.clone(),
                    transport: config.kind(),
                    status: ConnectionStatus::Disconnected,
                    tool_count: 0,
                    error: None,
                    server_info: None,
                    connected_at: None,
                },
            };
            snapshots.push(snapshot);
        }
        snapshots
    }

    /// Discovered tools per configured server, in server-name order.
    pub async fn server_tools(&self) -> Vec<(String, Vec<ToolDescriptor>)> {
        let mut out = Vec::with_capacity(self.servers.len());
        for name in self.servers.keys() {
            out.push((name.clone(), self.client.get_tools(name).await));
        }
        out
    }

    /// Build every callable tool: server tools first, then the discovery
    /// tools.
    ///
    /// Qualified names are unique. A server tool whose name is already taken
    /// (by a discovery tool or an earlier server) is skipped with a warning.
    pub async fn callable_tools(&self) -> Vec<CallableTool> {
        let discovery_tools = discovery::discovery_tools(self);
        let mut taken: HashSet<String> = discovery_tools.iter().map(|t| t.name.clone()).collect();

        let mut tools = Vec::new();
        for (server, descriptors) in self.server_tools().await {
            for descriptor in &descriptors {
                let tool = self.bridge_tool(&server, descriptor);
                if !taken.insert(tool.name.clone()) {
                    tracing::warn!(
                        server = %server,
                        tool = %tool.name,
                        "skipping tool whose qualified name is already taken"
                    );
                    continue;
                }
                tools.push(tool);
            }
        }
        tools.extend(discovery_tools);
        tools
    }

    /// Find one callable tool by qualified name.
    pub async fn find_tool(&self, name: &str) -> Option<CallableTool> {
        self.callable_tools()
            .await
            .into_iter()
            .find(|tool| tool.name == name)
    }

    /// Wrap one discovered tool.
    fn bridge_tool(&self, server_name: &str, descriptor: &ToolDescriptor) -> CallableTool {
        let client = self.client.clone();
        let server = server_name.to_string();
        let tool = descriptor.name.clone();

        let handler: ToolHandler = Arc::new(move |arguments| {
            let client = client.clone();
            let server = server.clone();
            let tool = tool.clone();
            async move {
                let result = client.call_tool(&server, &tool, arguments).await?;
                serde_json::to_string_pretty(&result).map_err(|e| McpError::RenderFailed {
                    what: format!("result of {server}/{tool}"),
                    reason: e.to_string(),
                })
            }
            .boxed()
        });

        CallableTool::new(
            qualified_name(server_name, &descriptor.name),
            descriptor.description.clone(),
            ToolSchema::translate(&descriptor.input_schema),
            handler,
        )
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
