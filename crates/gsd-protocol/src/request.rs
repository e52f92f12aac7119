//! Request envelope.

use serde::{Deserialize, Serialize};

/// Request envelope.
///
/// The supervising process accepts a single JSON request line on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol version chosen by the client.
    pub protocol_version: i32,
    /// Operation name (see [`crate::ops::names`]).
    pub op: String,
    /// Caller-chosen request ID for correlation.
    #[serde(default)]
    pub request_id: String,
    /// Operation-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RpcRequest {
    /// Build a request for the current protocol version.
    pub fn new(op: impl Into<String>, request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_MAX,
            op: op.into(),
            request_id: request_id.into(),
            payload,
        }
    }
}
