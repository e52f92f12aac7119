//! Safety policy report types.

use serde::{Deserialize, Serialize};

use super::arm::ArmStatusResponse;
use super::targets::{BootMode, DiskReport};

/// The rules a destructive write is held to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyPolicy {
    /// Word an operator must type to arm.
    pub write_word: String,
    pub arm_ttl_seconds: u64,
    pub plan_ttl_seconds: u64,
    /// Arm requires a live plan.
    pub plan_required: bool,
    /// The disk the appliance booted from is never a target.
    pub root_disk_blocked: bool,
    /// Whether the boot mode permits any write at all.
    pub can_flash_here: bool,
}

/// Safety response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyResponse {
    pub policy: SafetyPolicy,
    pub mode: BootMode,
    pub armed: ArmStatusResponse,
    #[serde(default)]
    pub eligible_targets: Vec<DiskReport>,
    /// Why part of the report could not be produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_note: Option<String>,
}
