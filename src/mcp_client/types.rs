//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures and server
//! configuration.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Env entries consulted for an HTTP bearer token, in order.
pub const AUTH_TOKEN_ENV_KEYS: &[&str] = &["AUTH_TOKEN", "MCP_AUTH_TOKEN"];

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// An incoming JSON-RPC message.
///
/// Responses carry an `id` and no `method`. Notifications and server-initiated
/// requests carry a `method`; they decode into this type too but are never
/// matched against a pending request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    /// `Some(Value::Null)` for an explicit `"result": null`; `None` only
    /// when the key is absent.
    #[serde(default, deserialize_with = "present")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The id this message answers, if it is a response at all.
    pub fn response_id(&self) -> Option<u64> {
        match self.method {
            Some(_) => None,
            None => self.id,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Any value that is present, `null` included, becomes `Some`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// `null` becomes the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// A tool as advertised by a server in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

/// `initialize` response payload. Only the parts we report on are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server identity returned in the initialize response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Params for `initialize`.
pub fn initialize_params(client_name: &str, client_version: &str) -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": client_name,
            "version": client_version,
        },
    })
}

/// Params for `tools/call`.
pub fn tool_call_params(tool_name: &str, arguments: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "name": tool_name,
        "arguments": arguments,
    })
}

// ─── Server Configuration ────────────────────────────────────────────────────

/// Which transport a server is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Sse => "sse",
        };
        f.write_str(s)
    }
}

/// Configuration of one tool server, tagged by `transportKind`.
///
/// Immutable once registered.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "transportKind", rename_all = "lowercase")]
pub enum ServerConfig {
    Stdio(StdioServerConfig),
    Http(HttpServerConfig),
    /// Accepted in config files; always rejected at connect time.
    Sse(SseServerConfig),
}

impl ServerConfig {
    /// The declared transport kind.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Http(_) => TransportKind::Http,
            Self::Sse(_) => TransportKind::Sse,
        }
    }

    /// Per-server environment overrides.
    pub fn env(&self) -> &HashMap<String, String> {
        match self {
            Self::Stdio(c) => &c.env,
            Self::Http(c) => &c.env,
            Self::Sse(c) => &c.env,
        }
    }

    /// Convenience constructor for a stdio server.
    pub fn stdio(command: &str, args: &[&str]) -> Self {
        Self::Stdio(StdioServerConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
        })
    }

    /// Convenience constructor for an HTTP server.
    pub fn http(endpoint: &str) -> Self {
        Self::Http(HttpServerConfig {
            endpoint: endpoint.to_string(),
            env: HashMap::new(),
        })
    }
}

/// A locally spawned server speaking line-delimited JSON-RPC on stdio.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StdioServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Merged over the parent process environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the child process.
    #[serde(default)]
    pub cwd: Option<String>,
}

/// A remote server reached by one POST per JSON-RPC call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpServerConfig {
    #[serde(alias = "url")]
    pub endpoint: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl HttpServerConfig {
    /// Bearer token from the env entries, if any is set and non-empty.
    pub fn auth_token(&self) -> Option<&str> {
        AUTH_TOKEN_ENV_KEYS
            .iter()
            .filter_map(|key| self.env.get(*key))
            .map(|v| v.as_str())
            .find(|v| !v.is_empty())
    }
}

/// Server-Sent-Events server. Parsed so config files load; never connected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SseServerConfig {
    #[serde(default, alias = "url")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
