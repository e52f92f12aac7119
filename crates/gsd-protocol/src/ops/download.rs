//! Download operation types.

use serde::{Deserialize, Serialize};

/// Start-download request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDownloadRequest {
    /// Catalog id of the OS image.
    pub os_id: String,
}

/// Start-download response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDownloadResponse {
    /// True when a verified entry already existed and no job was launched.
    pub cached: bool,
    /// Deterministic cache key for `(os_id, url)`.
    pub cache_key: String,
    /// Download job to poll (absent when `cached`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Canonical binary path of the entry.
    pub binary_path: String,
}
