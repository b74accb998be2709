//! JSON-RPC over HTTP transport.
//!
//! Every call is one self-contained POST: JSON-RPC envelope in the request
//! body, JSON-RPC response in the response body. There is no persistent
//! connection, no framing and no server push.

use std::time::Duration;

use reqwest::Client as HttpClient;

use super::errors::McpError;
use super::transport::{extract_result, next_request_id};
use super::types::{HttpServerConfig, JsonRpcRequest, JsonRpcResponse};

/// Longest error body echoed back into an error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Build the shared HTTP client used by every HTTP transport.
pub fn build_http_client(
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<HttpClient, McpError> {
    HttpClient::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .map_err(|e| McpError::ConfigError {
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// Request/response JSON-RPC transport to a remote endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    server_name: String,
    endpoint: String,
    auth_token: Option<String>,
    http: HttpClient,
}

impl HttpTransport {
    /// Create a transport for `config`. No I/O happens until the first call.
    pub fn new(server_name: &str, config: &HttpServerConfig, http: HttpClient) -> Self {
        Self {
            server_name: server_name.to_string(),
            endpoint: config.endpoint.clone(),
            auth_token: config.auth_token().map(String::from),
            http,
        }
    }

    /// POST one JSON-RPC request and return its result.
    ///
    /// Network failures and non-success statuses are hard errors: there is
    /// no connection to fall back on.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let mut builder = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&req);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("POST {} failed: {e}", self.endpoint),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                server = %self.server_name,
                status = status.as_u16(),
                method,
                "MCP HTTP call rejected"
            );
            return Err(McpError::HttpStatus {
                server: self.server_name.clone(),
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let body: JsonRpcResponse =
            response.json().await.map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("invalid JSON-RPC response body: {e}"),
            })?;

        if let Some(resp_id) = body.id {
            if resp_id != id {
                tracing::debug!(
                    server = %self.server_name,
                    expected = id,
                    got = resp_id,
                    "HTTP response id mismatch"
                );
            }
        }

        extract_result(body)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
