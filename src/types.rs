//! Wire types for the newline-delimited JSON-RPC 2.0 transport.
//!
//! Requests and responses are single JSON objects per line over the child
//! process's stdio streams. Responses carry exactly one of `result` or
//! `error`; [`ResponseEnvelope::into_outcome`] enforces that rule.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// JSON-RPC version string stamped on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version offered during the handshake.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Client name reported in `clientInfo`.
pub const CLIENT_NAME: &str = "mcp-reliability-lab";

/// Well-known method names.
pub mod methods {
    /// Handshake request negotiating version and capabilities.
    pub const INITIALIZE: &str = "initialize";
    /// Tool catalog request.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation request.
    pub const TOOLS_CALL: &str = "tools/call";
}

/// A single outbound request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name (e.g., `"tools/call"`).
    pub method: String,
    /// Method parameters.
    pub params: Value,
    /// Session-unique, monotonically increasing correlation id.
    pub id: u64,
}

impl RequestEnvelope {
    /// Creates an envelope with the version field filled in.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC error object carried in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single inbound response frame.
///
/// Both fields are optional at the serde level so that exclusive-field
/// violations are detected by [`Self::into_outcome`] rather than hidden by a
/// parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id echoing the request.
    pub id: u64,
    /// Success payload, mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload, mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ResponseEnvelope {
    /// Splits the envelope into its payload, enforcing the exclusive
    /// result/error rule.
    pub fn into_outcome(self) -> Result<std::result::Result<Value, RpcError>> {
        match (self.result, self.error) {
            (Some(_), Some(_)) => Err(Error::Protocol(
                "response carries both result and error".to_string(),
            )),
            (None, None) => Err(Error::Protocol(
                "response carries neither result nor error".to_string(),
            )),
            (Some(value), None) => Ok(Ok(value)),
            (None, Some(err)) => Ok(Err(err)),
        }
    }
}

/// Implementation information exchanged during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

/// Capability flags the client advertises during the handshake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Tool invocation support.
    pub tools: bool,
    /// Resource access support.
    pub resources: bool,
    /// Prompt retrieval support.
    pub prompts: bool,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            tools: true,
            resources: true,
            prompts: true,
        }
    }
}

/// Capabilities echoed by the server.
///
/// Servers report these in wildly different shapes, so the raw map is kept
/// and queried by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerCapabilities(pub serde_json::Map<String, Value>);

impl ServerCapabilities {
    /// Returns `true` if the server advertises the named capability with any
    /// value other than `false` or `null`.
    pub fn supports(&self, name: &str) -> bool {
        match self.0.get(name) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(_) => true,
        }
    }
}

/// `initialize` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the client wants to use.
    pub protocol_version: String,
    /// Client capability flags.
    pub capabilities: ClientCapabilities,
    /// Client implementation info.
    pub client_info: Implementation,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: CLIENT_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// `initialize` response payload.
///
/// `protocolVersion` and `capabilities` are required; a handshake response
/// missing either fails to parse and is reported as a protocol violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
    /// Server implementation info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
}

/// A tool descriptor from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name (unique identifier).
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's parameters.
    #[serde(default)]
    pub input_schema: Value,
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Available tools, in server-declared order.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}
