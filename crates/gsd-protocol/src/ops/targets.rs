//! Eligible-target snapshot types.

use serde::{Deserialize, Serialize};

/// How the appliance booted, which decides the transport policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BootMode {
    /// Booted from an SD card; NVMe disks are writable.
    Sd,
    /// Booted from NVMe; SD cards and USB disks are writable.
    Nvme,
    Unknown,
}

/// One disk as seen by the target provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskReport {
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tran: Option<String>,
    /// Partition device paths that are currently mounted.
    #[serde(default)]
    pub mounted_partitions: Vec<String>,
    #[serde(default)]
    pub mountpoints: Vec<String>,
    pub is_root_parent: bool,
    /// Whether the disk may be written under the current policy.
    pub allowed: bool,
    #[serde(default)]
    pub why_not: Vec<String>,
}

/// Targets response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetsResponse {
    pub mode: BootMode,
    pub root_source: String,
    pub root_parent: String,
    pub disks: Vec<DiskReport>,
}
