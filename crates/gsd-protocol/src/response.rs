//! Response envelope.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, RpcError};

/// Response envelope. Exactly one is written per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub protocol_version: i32,
    pub request_id: String,
    pub ok: bool,
    /// Present iff `ok`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Present iff `!ok`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(protocol_version: i32, request_id: String, payload: serde_json::Value) -> Self {
        Self {
            protocol_version,
            request_id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(protocol_version: i32, request_id: String, error: RpcError) -> Self {
        Self {
            protocol_version,
            request_id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Collapse the envelope into the payload or the error.
    ///
    /// A response claiming success without a payload yields `null`; one
    /// claiming failure without an error yields `INTERNAL`.
    pub fn into_result(self) -> Result<serde_json::Value, RpcError> {
        if self.ok {
            Ok(self.payload.unwrap_or(serde_json::Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| RpcError::new(ErrorCode::Internal, "error response without details")))
        }
    }
}
