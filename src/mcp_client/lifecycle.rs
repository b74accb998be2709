//! Connection establishment.
//!
//! Dispatches a `ServerConfig` to its transport, then runs the two-call
//! handshake: `initialize` followed by `tools/list`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as HttpClient;
use tokio::sync::oneshot;

use super::errors::McpError;
use super::http::HttpTransport;
use super::transport::{ProcessExit, StdioTransport};
use super::types::{initialize_params, InitializeResult, ServerConfig, ServerInfo, ToolDescriptor};

// ─── Transport ───────────────────────────────────────────────────────────────

/// A live transport handle, one variant per supported transport kind.
#[derive(Debug, Clone)]
pub enum Transport {
    Stdio(Arc<StdioTransport>),
    Http(HttpTransport),
}

impl Transport {
    /// Issue one JSON-RPC request and return its result.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        match self {
            Self::Stdio(t) => t.request(method, params).await,
            Self::Http(t) => t.request(method, params).await,
        }
    }

    /// Tear down the transport. Kills the stdio process; no-op for HTTP.
    pub fn close(&self) {
        if let Self::Stdio(t) = self {
            t.close();
        }
    }
}

/// Everything needed to spawn a transport.
pub struct ConnectParams<'a> {
    pub http: &'a HttpClient,
    pub response_timeout: Duration,
    pub client_name: &'a str,
    pub client_version: &'a str,
}

/// A transport that has completed the handshake.
#[derive(Debug)]
pub struct Established {
    pub transport: Transport,
    pub tools: Vec<ToolDescriptor>,
    pub server_info: Option<ServerInfo>,
    /// Fires when a stdio process exits on its own. `None` for HTTP.
    pub exit_rx: Option<oneshot::Receiver<ProcessExit>>,
}

// ─── Establish ───────────────────────────────────────────────────────────────

/// Open the transport described by `config` and perform the handshake.
///
/// On handshake failure the stdio process is killed before returning.
pub async fn establish(
    name: &str,
    config: &ServerConfig,
    params: &ConnectParams<'_>,
) -> Result<Established, McpError> {
    let (transport, exit_rx) = match config {
        ServerConfig::Stdio(cfg) => {
            let (transport, exit_rx) = StdioTransport::spawn(name, cfg, params.response_timeout)?;
            (Transport::Stdio(Arc::new(transport)), Some(exit_rx))
        }
        ServerConfig::Http(cfg) => (
            Transport::Http(HttpTransport::new(name, cfg, params.http.clone())),
            None,
        ),
        ServerConfig::Sse(_) => {
            return Err(McpError::UnsupportedTransport {
                name: name.to_string(),
                kind: config.kind().to_string(),
            });
        }
    };

    match handshake(&transport, name, params).await {
        Ok((server_info, tools)) => Ok(Established {
            transport,
            tools,
            server_info,
            exit_rx,
        }),
        Err(e) => {
            transport.close();
            Err(e)
        }
    }
}

/// Run `initialize` then `tools/list`.
async fn handshake(
    transport: &Transport,
    server_name: &str,
    params: &ConnectParams<'_>,
) -> Result<(Option<ServerInfo>, Vec<ToolDescriptor>), McpError> {
    let init = transport
        .request(
            "initialize",
            Some(initialize_params(params.client_name, params.client_version)),
        )
        .await
        .map_err(|e| init_failed(server_name, e))?;

    // A timed-out initialize resolves to `{}` and still parses.
    let init: InitializeResult = serde_json::from_value(init).unwrap_or_default();
    tracing::debug!(
        server = server_name,
        protocol_version = init.protocol_version.as_deref().unwrap_or("unknown"),
        server_info = ?init.server_info,
        "MCP initialize completed"
    );

    let listed = transport
        .request("tools/list", None)
        .await
        .map_err(|e| init_failed(server_name, e))?;

    Ok((init.server_info, parse_tool_list(server_name, &listed)))
}

fn init_failed(server_name: &str, e: McpError) -> McpError {
    match e {
        // Keep transport-level causes recognisable.
        McpError::HttpStatus { .. } | McpError::TransportError { .. } => e,
        other => McpError::InitFailed {
            name: server_name.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Extract the tool list from a `tools/list` result.
///
/// Entries that do not decode (e.g. missing `name`) are skipped with a
/// warning rather than failing the whole connection.
pub fn parse_tool_list(server_name: &str, result: &serde_json::Value) -> Vec<ToolDescriptor> {
    let Some(entries) = result.get("tools").and_then(|t| t.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<ToolDescriptor>(entry.clone()) {
            Ok(tool) => Some(tool),
            Err(e) => {
                tracing::warn!(
                    server = server_name,
                    error = %e,
                    "skipping malformed tool definition"
                );
                None
            }
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
