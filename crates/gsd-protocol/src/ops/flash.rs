//! Flash operation types.

use serde::{Deserialize, Serialize};

/// Flash request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashRequest {
    pub target: String,
    pub os_id: String,
    /// Token returned by `arm`.
    pub token: String,
    pub confirm_target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_suffix: Option<String>,
}

/// Flash response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashResponse {
    /// Write job to poll.
    pub job_id: String,
}
