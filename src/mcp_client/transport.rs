//! JSON-RPC over stdio transport.
//!
//! Owns one MCP server child process:
//! - requests are written to stdin, one JSON object per line
//! - stdout is read in raw chunks, framed by [`LineBuffer`] and routed to
//!   waiting requests through [`PendingRequests`]
//! - stderr is logged as diagnostics
//! - process exit is reported once on a oneshot channel

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

use super::correlation::PendingRequests;
use super::errors::McpError;
use super::framing::LineBuffer;
use super::types::{error_codes, JsonRpcRequest, JsonRpcResponse, StdioServerConfig};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter, shared by every transport.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID. Never reused, never reset by reconnection.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Constants ───────────────────────────────────────────────────────────────

/// Read size for child stdout.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Stderr lines containing any of these (case-insensitive) are routine
/// startup chatter and logged at debug instead of warn.
const STDERR_NOISE_PATTERNS: &[&str] = &[
    "running on stdio",
    "listening on stdio",
    "server started",
    "server running",
    "debugger attached",
    "experimentalwarning",
    "npm warn",
];

// ─── Process Exit ────────────────────────────────────────────────────────────

/// How a server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// Exit code 0. Anything else, including death by signal, is abnormal.
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a child process's stdio.
///
/// The child is owned by a supervisor task. Calling [`StdioTransport::close`]
/// or dropping the transport kills it, so a transport never outlives its
/// process and vice versa.
#[derive(Debug)]
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<ChildStdin>,
    pending: Arc<PendingRequests>,
    response_timeout: Duration,
    kill_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl StdioTransport {
    /// Spawn the server process and wire its three streams.
    ///
    /// The child inherits this process's environment with `config.env`
    /// layered on top. The returned receiver fires once when the process
    /// exits on its own; it is dropped without firing when the transport
    /// kills the process.
    pub fn spawn(
        name: &str,
        config: &StdioServerConfig,
        response_timeout: Duration,
    ) -> Result<(Self, oneshot::Receiver<ProcessExit>), McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        cmd.envs(&config.env);
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{}: {e}", config.command),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr = child.stderr.take();

        tracing::debug!(
            server = name,
            command = %config.command,
            pid = child.id(),
            "spawned MCP server process"
        );

        let pending = Arc::new(PendingRequests::new());

        tokio::spawn(read_stdout(name.to_string(), stdout, Arc::clone(&pending)));
        if let Some(stderr) = stderr {
            tokio::spawn(read_stderr(name.to_string(), stderr));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(supervise(name.to_string(), child, kill_rx, exit_tx));

        let transport = Self {
            server_name: name.to_string(),
            writer: Mutex::new(stdin),
            pending,
            response_timeout,
            kill_tx: std::sync::Mutex::new(Some(kill_tx)),
        };

        Ok((transport, exit_rx))
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// The waiter is registered before the line is written. If nothing
    /// answers within the response timeout the call resolves to an empty
    /// object rather than an error, and the registration is removed.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let mut line = serde_json::to_string(&req).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        line.push('\n');

        let rx = self
            .pending
            .register(id)
            .await
            .ok_or_else(|| McpError::ConnectionClosed {
                server: self.server_name.clone(),
            })?;

        if let Err(e) = self.write_line(&line).await {
            self.pending.cancel(id).await;
            return Err(e);
        }

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(response)) => extract_result(response),
            Ok(Err(_)) => Err(McpError::ConnectionClosed {
                server: self.server_name.clone(),
            }),
            Err(_) => {
                self.pending.cancel(id).await;
                tracing::warn!(
                    server = %self.server_name,
                    id,
                    method,
                    timeout_ms = self.response_timeout.as_millis() as u64,
                    "no response before timeout, resolving empty"
                );
                Ok(serde_json::Value::Object(serde_json::Map::new()))
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), McpError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    /// Kill the child process. Idempotent.
    pub fn close(&self) {
        let sender = match self.kill_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// ─── Background Tasks ────────────────────────────────────────────────────────

/// Read stdout in raw chunks until EOF, dispatching every framed message.
async fn read_stdout(server: String, mut stdout: ChildStdout, pending: Arc<PendingRequests>) {
    let mut buffer = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for message in buffer.feed(&chunk[..n]) {
                    pending.dispatch(message).await;
                }
            }
            Err(e) => {
                tracing::warn!(server = %server, error = %e, "failed to read server stdout");
                break;
            }
        }
    }

    if !buffer.pending_bytes().is_empty() {
        tracing::debug!(
            server = %server,
            bytes = buffer.pending_bytes().len(),
            "discarding unterminated line at EOF"
        );
    }
    tracing::debug!(server = %server, "server stdout closed");
    pending.close().await;
}

/// Log each stderr line. Diagnostics are never fatal.
async fn read_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if is_stderr_noise(line) {
                    tracing::debug!(server = %server, stderr = %line, "server diagnostic");
                } else {
                    tracing::warn!(server = %server, stderr = %line, "server diagnostic");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "stopped reading server stderr");
                break;
            }
        }
    }
}

/// Own the child: report a natural exit, or kill it on request.
///
/// A dropped kill sender counts as a kill request.
async fn supervise(
    server: String,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<ProcessExit>,
) {
    tokio::select! {
        status = child.wait() => {
            let exit = ProcessExit {
                code: status.ok().and_then(|s| s.code()),
            };
            tracing::info!(server = %server, code = ?exit.code, "server process exited");
            let _ = exit_tx.send(exit);
        }
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                tracing::debug!(server = %server, error = %e, "kill failed (process already gone?)");
            }
            tracing::debug!(server = %server, "server process terminated");
        }
    }
}

/// Whether a stderr line matches known routine output.
pub fn is_stderr_noise(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    STDERR_NOISE_PATTERNS.iter().any(|p| lower.contains(p))
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
