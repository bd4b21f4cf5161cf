//! JSON-RPC 2.0 wire types for MCP transport sessions.
//!
//! These mirror the envelope shapes used on the wire by every Model Context
//! Protocol server regardless of transport (stdio, HTTP/SSE): a request has
//! an `id`, a `method`, and optional `params`; a response carries either
//! `result` or `error` but never both.

use serde::{Deserialize, Serialize};

/// Most recent protocol revision this crate negotiates.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";

/// Prior protocol revision accepted as a fallback during negotiation.
pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";

/// All protocol versions this crate is willing to negotiate, most recent first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[LATEST_PROTOCOL_VERSION, PROTOCOL_VERSION_2025_03_26];

/// The `initialize` method name.
pub const METHOD_INITIALIZE: &str = "initialize";
/// The `notifications/initialized` method name.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// The `tools/list` method name.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// The `tools/call` method name.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// The `ping` method name.
pub const METHOD_PING: &str = "ping";

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier; `None` would make this a notification, but probes
    /// never issue notifications, so every outbound request here carries one.
    pub id: Option<serde_json::Value>,
    /// JSON-RPC method name.
    pub method: String,
    /// Method parameters, if any.
    pub params: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoes the request's `id`.
    pub id: Option<serde_json::Value>,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// Client-side `initialize` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Highest protocol version this client supports.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Declared client capabilities; an empty object is valid.
    pub capabilities: serde_json::Value,
    /// Client name/version metadata.
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// Client identification sent during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version string.
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "cortexdx".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The server's `initialize` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version the server chose.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server-declared capabilities, passed through uninterpreted.
    pub capabilities: serde_json::Value,
    /// Server name/version metadata.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Server identification returned from `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version string.
    pub version: String,
}
