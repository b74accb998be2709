//! MCP Client — owns every server connection.
//!
//! Drives the per-server state machine
//! (`disconnected → connecting → {connected, error}`), schedules automatic
//! reconnection after a stdio process crashes, and routes `tools/call`
//! requests to the right transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, RwLock};

use super::errors::McpError;
use super::http::build_http_client;
use super::lifecycle::{self, ConnectParams, Transport};
use super::transport::ProcessExit;
use super::types::{tool_call_params, ServerConfig, ServerInfo, ToolDescriptor, TransportKind};

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long a stdio request waits for its response before resolving empty.
const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 15_000;

/// Delay between an abnormal stdio exit and the automatic reconnect attempt.
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

/// Total HTTP request timeout.
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 60_000;

/// HTTP TCP connect timeout.
const DEFAULT_HTTP_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Source of connection epochs. A new epoch is taken every time a
/// connection enters `connecting`, so stale background work can tell it has
/// been superseded.
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

fn next_epoch() -> u64 {
    NEXT_EPOCH.fetch_add(1, Ordering::Relaxed)
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Client tunables. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub response_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub http_timeout_ms: u64,
    pub http_connect_timeout_ms: u64,
    /// Sent as `clientInfo.name` in `initialize`.
    pub client_name: String,
    /// Sent as `clientInfo.version` in `initialize`.
    pub client_version: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            http_connect_timeout_ms: DEFAULT_HTTP_CONNECT_TIMEOUT_MS,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ClientSettings {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

// ─── Connection State ────────────────────────────────────────────────────────

/// Coarse connection status, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-state payload. A transport handle exists only while connected.
#[derive(Debug)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected {
        transport: Transport,
        tools: Vec<ToolDescriptor>,
        server_info: Option<ServerInfo>,
        connected_at: DateTime<Utc>,
    },
    Error {
        reason: String,
    },
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Connected { .. } => ConnectionStatus::Connected,
            Self::Error { .. } => ConnectionStatus::Error,
        }
    }
}

/// One registered server: its config, current state and epoch.
#[derive(Debug)]
struct Connection {
    config: ServerConfig,
    state: ConnectionState,
    epoch: u64,
}

impl Connection {
    /// Move to `next`, closing the transport if we were connected.
    fn transition(&mut self, next: ConnectionState) {
        let previous = std::mem::replace(&mut self.state, next);
        if let ConnectionState::Connected { transport, .. } = previous {
            transport.close();
        }
    }
}

/// Point-in-time view of one connection, for discovery output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    pub name: String,
    pub transport: TransportKind,
    pub status: ConnectionStatus,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Cheaply cloneable handle to the shared client state.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    connections: RwLock<HashMap<String, Connection>>,
    http: HttpClient,
    settings: ClientSettings,
}

impl McpClient {
    /// Create a client with no connections.
    pub fn new(settings: ClientSettings) -> Result<Self, McpError> {
        let http = build_http_client(
            Duration::from_millis(settings.http_connect_timeout_ms),
            Duration::from_millis(settings.http_timeout_ms),
        )?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                connections: RwLock::new(HashMap::new()),
                http,
                settings,
            }),
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect `name` using `config` and run the handshake.
    ///
    /// Returns `true` immediately if the server is already connected. Any
    /// failure, including an unsupported transport, leaves the connection in
    /// the error state and returns `false`; nothing is raised, so a batch
    /// connect is never aborted by one server.
    pub async fn connect(&self, name: &str, config: ServerConfig) -> bool {
        let epoch = {
            let mut conns = self.inner.connections.write().await;
            match conns.get(name).map(|c| c.state.status()) {
                Some(ConnectionStatus::Connected) => {
                    tracing::debug!(server = name, "already connected");
                    return true;
                }
                Some(ConnectionStatus::Connecting) => {
                    tracing::debug!(server = name, "connect already in progress");
                    return false;
                }
                _ => {}
            }
            let epoch = next_epoch();
            conns.insert(
                name.to_string(),
                Connection {
                    config: config.clone(),
                    state: ConnectionState::Connecting,
                    epoch,
                },
            );
            epoch
        };

        self.run_connect(name, &config, epoch).await
    }

    /// Connect every server in order, awaiting each handshake in turn.
    ///
    /// Returns one `(name, connected)` pair per server.
    pub async fn connect_all<I>(&self, servers: I) -> Vec<(String, bool)>
    where
        I: IntoIterator<Item = (String, ServerConfig)>,
    {
        let mut results = Vec::new();
        for (name, config) in servers {
            let ok = self.connect(&name, config).await;
            results.push((name, ok));
        }
        results
    }

    /// Tear down and re-establish `name` from its stored config, whatever
    /// state it is in.
    pub async fn reconnect(&self, name: &str) -> bool {
        let (config, epoch) = {
            let mut conns = self.inner.connections.write().await;
            let Some(conn) = conns.get_mut(name) else {
                tracing::warn!(server = name, "reconnect requested for unknown server");
                return false;
            };
            let epoch = next_epoch();
            conn.epoch = epoch;
            conn.transition(ConnectionState::Connecting);
            (conn.config.clone(), epoch)
        };

        self.run_connect(name, &config, epoch).await
    }

    /// Terminate the transport and forget the connection entirely.
    ///
    /// Returns `false` if nothing was registered under `name`.
    pub async fn disconnect(&self, name: &str) -> bool {
        let removed = self.inner.connections.write().await.remove(name);
        match removed {
            Some(mut conn) => {
                conn.transition(ConnectionState::Disconnected);
                tracing::info!(server = name, "MCP server disconnected");
                true
            }
            None => false,
        }
    }

    /// Disconnect every server.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, Connection)> =
            self.inner.connections.write().await.drain().collect();
        let count = drained.len();
        for (_, mut conn) in drained {
            conn.transition(ConnectionState::Disconnected);
        }
        tracing::info!(servers = count, "all MCP servers shut down");
    }

    /// Establish the transport for a connection already marked `connecting`
    /// under `epoch`, then record the outcome.
    async fn run_connect(&self, name: &str, config: &ServerConfig, epoch: u64) -> bool {
        let settings = &self.inner.settings;
        let params = ConnectParams {
            http: &self.inner.http,
            response_timeout: settings.response_timeout(),
            client_name: &settings.client_name,
            client_version: &settings.client_version,
        };

        let outcome = lifecycle::establish(name, config, &params).await;

        let mut conns = self.inner.connections.write().await;
        let Some(conn) = conns.get_mut(name).filter(|c| c.epoch == epoch) else {
            // Disconnected or superseded while the handshake was running.
            if let Ok(established) = outcome {
                established.transport.close();
            }
            tracing::debug!(server = name, "discarding superseded connect attempt");
            return false;
        };

        match outcome {
            Ok(established) => {
                tracing::info!(
                    server = name,
                    transport = %config.kind(),
                    tools = established.tools.len(),
                    "MCP server connected"
                );
                if let Some(exit_rx) = established.exit_rx {
                    self.watch_exit(name, epoch, exit_rx);
                }
                conn.transition(ConnectionState::Connected {
                    transport: established.transport,
                    tools: established.tools,
                    server_info: established.server_info,
                    connected_at: Utc::now(),
                });
                true
            }
            Err(e) => {
                tracing::warn!(server = name, error = %e, "MCP server failed to connect");
                conn.transition(ConnectionState::Error {
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    // ─── Crash Recovery ──────────────────────────────────────────────────

    /// Wait for the stdio process of `epoch` to exit on its own.
    ///
    /// Holds only a weak reference so a dropped client stops all recovery.
    fn watch_exit(&self, name: &str, epoch: u64, exit_rx: oneshot::Receiver<ProcessExit>) {
        let weak = Arc::downgrade(&self.inner);
        let name = name.to_string();
        tokio::spawn(async move {
            // A closed channel means we killed the process ourselves.
            let Ok(exit) = exit_rx.await else {
                return;
            };
            let Some(client) = upgrade(&weak) else {
                return;
            };
            if !client.handle_exit(&name, epoch, exit).await {
                return;
            }
            let delay = client.inner.settings.reconnect_delay();
            drop(client);

            tokio::time::sleep(delay).await;

            if let Some(client) = upgrade(&weak) {
                client.reconnect_after_exit(&name, epoch).await;
            }
        });
    }

    /// Record a process exit. Returns `true` if a reconnect should follow.
    async fn handle_exit(&self, name: &str, epoch: u64, exit: ProcessExit) -> bool {
        let mut conns = self.inner.connections.write().await;
        let Some(conn) = conns.get_mut(name) else {
            return false;
        };
        if conn.epoch != epoch || conn.state.status() != ConnectionStatus::Connected {
            return false;
        }
        conn.transition(ConnectionState::Disconnected);

        if exit.is_clean() {
            tracing::info!(server = name, "MCP server exited cleanly");
            return false;
        }

        tracing::warn!(
            server = name,
            code = ?exit.code,
            delay_ms = self.inner.settings.reconnect_delay_ms,
            "MCP server exited abnormally, scheduling reconnect"
        );
        true
    }

    /// One automatic reconnect attempt. Failures are logged, never raised.
    async fn reconnect_after_exit(&self, name: &str, exited_epoch: u64) {
        let (config, epoch) = {
            let mut conns = self.inner.connections.write().await;
            let Some(conn) = conns.get_mut(name) else {
                return;
            };
            // Any manual connect, reconnect or disconnect in the meantime wins.
            if conn.epoch != exited_epoch || conn.state.status() != ConnectionStatus::Disconnected {
                return;
            }
            let epoch = next_epoch();
            conn.epoch = epoch;
            conn.transition(ConnectionState::Connecting);
            (conn.config.clone(), epoch)
        };

        if self.run_connect(name, &config, epoch).await {
            tracing::info!(server = name, "automatic reconnect succeeded");
        } else {
            tracing::warn!(server = name, "automatic reconnect failed");
        }
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Invoke `tool_name` on `server_name` and return the raw result.
    ///
    /// The server must be connected. The result is returned verbatim.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let transport = {
            let conns = self.inner.connections.read().await;
            let conn = conns.get(server_name).ok_or_else(|| McpError::UnknownServer {
                name: server_name.to_string(),
            })?;
            match &conn.state {
                ConnectionState::Connected { transport, .. } => transport.clone(),
                other => {
                    return Err(McpError::NotConnected {
                        name: server_name.to_string(),
                        status: other.status().to_string(),
                    })
                }
            }
        };

        tracing::debug!(server = server_name, tool = tool_name, "calling MCP tool");
        transport
            .request("tools/call", Some(tool_call_params(tool_name, arguments)))
            .await
    }

    // ─── Status ──────────────────────────────────────────────────────────

    /// Tools from the last successful discovery; empty unless connected.
    pub async fn get_tools(&self, server_name: &str) -> Vec<ToolDescriptor> {
        let conns = self.inner.connections.read().await;
        match conns.get(server_name).map(|c| &c.state) {
            Some(ConnectionState::Connected { tools, .. }) => tools.clone(),
            _ => Vec::new(),
        }
    }

    /// Current status, or `None` if the name has no connection.
    pub async fn status(&self, server_name: &str) -> Option<ConnectionStatus> {
        let conns = self.inner.connections.read().await;
        conns.get(server_name).map(|c| c.state.status())
    }

    /// Snapshot of one connection.
    pub async fn snapshot(&self, server_name: &str) -> Option<ServerSnapshot> {
        let conns = self.inner.connections.read().await;
        conns.get(server_name).map(|c| snapshot_of(server_name, c))
    }

    /// Snapshots of every connection, sorted by name.
    pub async fn server_snapshots(&self) -> Vec<ServerSnapshot> {
        let conns = self.inner.connections.read().await;
        let mut snapshots: Vec<ServerSnapshot> =
            conns.iter().map(|(name, c)| snapshot_of(name, c)).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Names of all connections (any state), sorted.
    pub async fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.connections.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

fn upgrade(weak: &Weak<ClientInner>) -> Option<McpClient> {
    weak.upgrade().map(|inner| McpClient { inner })
}

fn snapshot_of(name: &str, conn: &Connection) -> ServerSnapshot {
    let mut snapshot = ServerSnapshot {
        name: name.to_string(),
        transport: conn.config.kind(),
        status: conn.state.status(),
        tool_count: 0,
        error: None,
        server_info: None,
        connected_at: None,
    };
    match &conn.state {
        ConnectionState::Connected {
            tools,
            server_info,
            connected_at,
            ..
        } => {
            snapshot.tool_count = tools.len();
            snapshot.server_info = server_info.clone();
            snapshot.connected_at = Some(*connected_at);
        }
        ConnectionState::Error { reason } => snapshot.error = Some(reason.clone()),
        ConnectionState::Disconnected | ConnectionState::Connecting => {}
    }
    snapshot
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_client() -> McpClient {
        McpClient::new(ClientSettings {
            response_timeout_ms: 2_000,
            reconnect_delay_ms: 200,
            ..ClientSettings::default()
        })
        .unwrap()
    }

    pub(crate) async fn wait_for_status(
        client: &McpClient,
        name: &str,
        want: Option<ConnectionStatus>,
        within: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if client.status(name).await == want {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = ClientSettings::default();
        assert_eq!(settings.response_timeout(), Duration::from_secs(15));
        assert_eq!(settings.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(settings.client_name, "mcp-bridge");
    }

    #[test]
    fn test_settings_partial_override() {
        let settings: ClientSettings =
            serde_json::from_str(r#"{"reconnect_delay_ms": 500}"#).unwrap();
        assert_eq!(settings.reconnect_delay_ms, 500);
        assert_eq!(settings.response_timeout_ms, DEFAULT_RESPONSE_TIMEOUT_MS);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
        assert_eq!(
            serde_json::to_value(ConnectionStatus::Disconnected).unwrap(),
            "disconnected"
        );
    }

    #[tokio::test]
    async fn test_sse_connect_fails_with_error_status() {
        let client = test_client();
        let config: ServerConfig = serde_json::from_value(
            serde_json::json!({"transportKind": "sse", "endpoint": "http://localhost/sse"}),
        )
        .unwrap();

        assert!(!client.connect("events", config).await);
        assert_eq!(client.status("events").await, Some(ConnectionStatus::Error));

        let snap = client.snapshot("events").await.unwrap();
        assert_eq!(snap.tool_count, 0);
        assert!(snap.error.unwrap().contains("unsupported transport"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_not_raised() {
        let client = test_client();
        let ok = client
            .connect("ghost", ServerConfig::stdio("/nonexistent/mcp-server", &[]))
            .await;
        assert!(!ok);
        assert_eq!(client.status("ghost").await, Some(ConnectionStatus::Error));
    }

    #[tokio::test]
    async fn test_call_tool_requires_connection() {
        let client = test_client();
        let err = client
            .call_tool("nobody", "read", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownServer { .. }));

        client
            .connect("ghost", ServerConfig::stdio("/nonexistent/mcp-server", &[]))
            .await;
        let err = client
            .call_tool("ghost", "read", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected { ref status, .. } if status == "error"));
    }

    #[tokio::test]
    async fn test_batch_connect_continues_past_failures() {
        let client = test_client();
        let results = client
            .connect_all(vec![
                ("bad".to_string(), ServerConfig::stdio("/nonexistent/a", &[])),
                (
                    "sse".to_string(),
                    serde_json::from_value(serde_json::json!({"transportKind": "sse"})).unwrap(),
                ),
            ])
            .await;
        assert_eq!(
            results,
            vec![("bad".to_string(), false), ("sse".to_string(), false)]
        );
        assert_eq!(client.connection_names().await, vec!["bad", "sse"]);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_is_false() {
        let client = test_client();
        assert!(!client.disconnect("nobody").await);
        assert!(!client.reconnect("nobody").await);
    }

    #[tokio::test]
    async fn test_http_connect_and_call() {
        use crate::mcp_client::http::tests::{mcp_handler, spawn_stub};

        let (url, seen) = spawn_stub(mcp_handler()).await;
        let client = test_client();

        assert!(client.connect("remote", ServerConfig::http(&url)).await);
        let tools = client.get_tools("remote").await;
        assert_eq!(tools[0].name, "search");

        let result = client
            .call_tool("remote", "search", serde_json::json!({"query": "rust"}))
            .await
            .unwrap();
        assert_eq!(result["arguments"]["query"], "rust");

        // Already connected: no second handshake.
        assert!(client.connect("remote", ServerConfig::http(&url)).await);
        let initializes = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.body["method"] == "initialize")
            .count();
        assert_eq!(initializes, 1);

        // HTTP disconnect just forgets the entry.
        assert!(client.disconnect("remote").await);
        assert_eq!(client.status("remote").await, None);
    }

    #[tokio::test]
    async fn test_http_error_status_fails_connect() {
        use crate::mcp_client::http::tests::{spawn_stub, StubHandler};

        let handler: StubHandler =
            std::sync::Arc::new(|_: &serde_json::Value| (503, serde_json::json!({})));
        let (url, _) = spawn_stub(handler).await;
        let client = test_client();

        assert!(!client.connect("remote", ServerConfig::http(&url)).await);
        let snap = client.snapshot("remote").await.unwrap();
        assert_eq!(snap.status, ConnectionStatus::Error);
        assert!(snap.error.unwrap().contains("503"));
    }

    // ─── Stdio scenarios (real child processes) ──────────────────────────

    /// A `/bin/sh` MCP server.
    ///
    /// Env: `TOOLS` (JSON array for tools/list), `LOG` (append every request
    /// line), `MARKER` (touched before crashing; if present at startup the
    /// server exits 1 immediately). Tool names `crash`, `quit` and `slow`
    /// exit 1, exit 0 and never answer respectively.
    #[cfg(unix)]
    pub(crate) const FAKE_SERVER: &str = r#"
        if [ -n "$MARKER" ] && [ -e "$MARKER" ]; then exit 1; fi
        while IFS= read -r line; do
            id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\).*/\1/p')
            if [ -n "$LOG" ]; then printf '%s\n' "$line" >> "$LOG"; fi
            case "$line" in
                *'"method":"initialize"'*)
                    printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"1"}}}\n' "$id" ;;
                *'"method":"tools/list"'*)
                    printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":%s}}\n' "$id" "$TOOLS" ;;
                *'"name":"crash"'*)
                    if [ -n "$MARKER" ]; then : > "$MARKER"; fi
                    exit 1 ;;
                *'"name":"quit"'*)
                    exit 0 ;;
                *'"name":"slow"'*)
                    : ;;
                *'"method":"tools/call"'*)
                    printf 'noise before the answer\n'
                    printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}]}}\n' "$id" ;;
            esac
        done
    "#;

    #[cfg(unix)]
    pub(crate) const FS_TOOLS: &str = r#"[{"name":"read","description":"Read a file","inputSchema":{"type":"object","properties":{"path":{"type":"string"}},"required":["path"]}}]"#;

    #[cfg(unix)]
    pub(crate) fn fake_server(env: &[(&str, &str)]) -> ServerConfig {
        let mut config = ServerConfig::stdio("/bin/sh", &["-c", FAKE_SERVER]);
        if let ServerConfig::Stdio(cfg) = &mut config {
            cfg.env.insert("TOOLS".into(), FS_TOOLS.into());
            for (k, v) in env {
                cfg.env.insert(k.to_string(), v.to_string());
            }
        }
        config
    }

    #[cfg(unix)]
    fn logged_methods(log: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
            .filter_map(|v| v["method"].as_str().map(String::from))
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_handshake_sends_initialize_then_tools_list() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = tmp.path().join("requests.log");
        let client = test_client();

        let config = fake_server(&[("LOG", log.to_str().unwrap())]);
        assert!(client.connect("fs", config.clone()).await);
        assert_eq!(client.status("fs").await, Some(ConnectionStatus::Connected));

        let tools = client.get_tools("fs").await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read");
        assert_eq!(tools[0].input_schema["required"][0], "path");
        assert_eq!(logged_methods(&log), vec!["initialize", "tools/list"]);

        let first: serde_json::Value = serde_json::from_str(
            std::fs::read_to_string(&log).unwrap().lines().next().unwrap(),
        )
        .unwrap();
        assert_eq!(first["params"]["protocolVersion"], "2024-11-05");
        assert_eq!(first["params"]["clientInfo"]["name"], "mcp-bridge");

        // Second connect is a no-op success.
        assert!(client.connect("fs", config).await);
        assert_eq!(logged_methods(&log).len(), 2);

        let snap = client.snapshot("fs").await.unwrap();
        assert_eq!(snap.server_info.unwrap().name.as_deref(), Some("fake"));
        assert!(snap.connected_at.is_some());

        client.shutdown_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_concurrent_calls() {
        let client = test_client();
        assert!(client.connect("fs", fake_server(&[])).await);

        let calls = (0..4).map(|i| {
            let client = client.clone();
            async move {
                client
                    .call_tool("fs", "read", serde_json::json!({"path": format!("/tmp/{i}")}))
                    .await
            }
        });
        for result in futures::future::join_all(calls).await {
            assert_eq!(result.unwrap()["content"][0]["text"], "ok");
        }
        client.shutdown_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_unanswered_call_resolves_empty() {
        let client = McpClient::new(ClientSettings {
            response_timeout_ms: 500,
            ..ClientSettings::default()
        })
        .unwrap();
        assert!(client.connect("fs", fake_server(&[])).await);

        let result = client
            .call_tool("fs", "slow", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({}));
        // The server is still usable afterwards.
        assert!(client
            .call_tool("fs", "read", serde_json::json!({"path": "x"}))
            .await
            .is_ok());
        client.shutdown_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_disconnect_then_connect_starts_clean() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = tmp.path().join("requests.log");
        let client = test_client();
        let config = fake_server(&[("LOG", log.to_str().unwrap())]);

        assert!(client.connect("fs", config.clone()).await);
        assert!(client.disconnect("fs").await);
        assert_eq!(client.status("fs").await, None);
        assert!(client.get_tools("fs").await.is_empty());

        assert!(client.connect("fs", config).await);
        assert_eq!(
            logged_methods(&log),
            vec!["initialize", "tools/list", "initialize", "tools/list"]
        );
        client.shutdown_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_manual_reconnect_rehandshakes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = tmp.path().join("requests.log");
        let client = test_client();

        assert!(client.connect("fs", fake_server(&[("LOG", log.to_str().unwrap())])).await);
        assert!(client.reconnect("fs").await);
        assert_eq!(client.status("fs").await, Some(ConnectionStatus::Connected));
        assert_eq!(logged_methods(&log).len(), 4);
        client.shutdown_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crash_triggers_automatic_reconnect() {
        let client = test_client();
        assert!(client.connect("fs", fake_server(&[])).await);

        let _ = client.call_tool("fs", "crash", serde_json::json!({})).await;

        assert!(
            wait_for_status(
                &client,
                "fs",
                Some(ConnectionStatus::Disconnected),
                Duration::from_secs(2)
            )
            .await,
            "status should drop to disconnected after a crash"
        );
        assert!(
            wait_for_status(
                &client,
                "fs",
                Some(ConnectionStatus::Connected),
                Duration::from_secs(5)
            )
            .await,
            "reconnect should happen without caller involvement"
        );
        assert_eq!(client.get_tools("fs").await.len(), 1);
        client.shutdown_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_reconnect_ends_in_error_without_retry() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("crashed");
        let client = test_client();
        assert!(client.connect("fs", fake_server(&[("MARKER", marker.to_str().unwrap())])).await);

        let _ = client.call_tool("fs", "crash", serde_json::json!({})).await;

        assert!(
            wait_for_status(&client, "fs", Some(ConnectionStatus::Error), Duration::from_secs(5))
                .await
        );
        // No further automatic retry for that exit.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(client.status("fs").await, Some(ConnectionStatus::Error));
        client.shutdown_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_exit_does_not_reconnect() {
        let client = test_client();
        assert!(client.connect("fs", fake_server(&[])).await);

        let _ = client.call_tool("fs", "quit", serde_json::json!({})).await;

        assert!(
            wait_for_status(
                &client,
                "fs",
                Some(ConnectionStatus::Disconnected),
                Duration::from_secs(2)
            )
            .await
        );
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            client.status("fs").await,
            Some(ConnectionStatus::Disconnected)
        );
        assert!(client.get_tools("fs").await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let client = test_client();
        assert!(client.connect("fs", fake_server(&[])).await);
        let _ = client.call_tool("fs", "crash", serde_json::json!({})).await;
        assert!(
            wait_for_status(
                &client,
                "fs",
                Some(ConnectionStatus::Disconnected),
                Duration::from_secs(2)
            )
            .await
        );

        assert!(client.disconnect("fs").await);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(client.status("fs").await, None);
    }
}
