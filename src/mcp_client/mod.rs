//! MCP Client — connects to MCP tool servers and bridges their tools.
//!
//! This module handles:
//! - Spawning stdio server processes and framing line-delimited JSON-RPC
//! - Single-shot JSON-RPC over HTTP with bearer auth
//! - Request/response correlation with a per-request timeout
//! - The per-server connection state machine and crash reconnection
//! - Schema translation into validated, callable tools
//! - The two discovery tools exposed to the agent

pub mod client;
pub mod correlation;
pub mod discovery;
pub mod errors;
pub mod framing;
pub mod http;
pub mod lifecycle;
pub mod registry;
pub mod schema;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{ClientSettings, ConnectionStatus, McpClient, ServerSnapshot};
pub use errors::McpError;
pub use registry::{qualified_name, CallableTool, ToolRegistry};
pub use schema::{FieldType, ToolSchema};
pub use types::{ServerConfig, ToolDescriptor, TransportKind};
