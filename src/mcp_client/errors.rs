//! MCP client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
///
/// Connection-level failures never escape `McpClient::connect` (it reports a
/// boolean), and tool-call failures are rendered as text by the registry.
/// Everything below that boundary propagates with `?`.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The `initialize` / `tools/list` handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// I/O or (de)serialization failure while talking to a server.
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// An HTTP server answered with a non-success status.
    #[error("server '{server}' returned HTTP {status}: {body}")]
    HttpStatus {
        server: String,
        status: u16,
        body: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The configured transport kind cannot be connected (e.g. `sse`).
    #[error("server '{name}' uses unsupported transport '{kind}'")]
    UnsupportedTransport {
        name: String,
        kind: String,
    },

    /// The server exists but is not in the connected state.
    #[error("server '{name}' is not connected (status: {status})")]
    NotConnected {
        name: String,
        status: String,
    },

    /// No connection or configuration exists under this name.
    #[error("unknown server: '{name}'")]
    UnknownServer {
        name: String,
    },

    /// A server name was registered twice.
    #[error("server '{name}' is already registered")]
    DuplicateServer {
        name: String,
    },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// The server process went away while a request was outstanding.
    #[error("connection to server '{server}' closed")]
    ConnectionClosed {
        server: String,
    },

    /// A result or discovery summary could not be rendered as JSON text.
    #[error("failed to render {what}: {reason}")]
    RenderFailed {
        what: String,
        reason: String,
    },

    /// Configuration error (missing file, bad syntax).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}
