use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 request id. The settlement service echoes whatever we send,
/// so request correlation keys off this rather than off a counter kept
/// server-side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: RpcId,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: RpcId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A JSON-RPC response, correlated back to a pending request by `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub id: RpcId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// A server-pushed frame with no `id` — either a bare notification or the
/// `subscription` frames documented in spec.md §6 (demultiplexed by
/// `accountPath` downstream in the Settlement Client).
#[derive(Debug, Clone, Deserialize)]
pub struct RpcNotification {
    pub method: String,
    pub params: Value,
}
