//! Arm, arm-status and disarm operation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Arm request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmRequest {
    /// Id returned by plan_flash for this target and OS.
    #[serde(default)]
    pub plan_id: String,
    /// Block device path to authorize.
    pub target: String,
    /// OS image to authorize.
    pub os_id: String,
    /// Second entry of the target, must equal `target`.
    pub confirm_target: String,
    /// Human-entered confirmation word.
    pub word: String,
    /// Optional trailing characters of the target disk's serial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_suffix: Option<String>,
}

/// Arm response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmResponse {
    /// Single-use capability for the flash request.
    pub token: String,
    pub target: String,
    pub os_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Arm-status response payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArmStatusResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Disarm response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisarmResponse {
    /// Always false after a disarm.
    pub active: bool,
}
