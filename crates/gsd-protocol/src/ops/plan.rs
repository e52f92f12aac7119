//! Flash planning operation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Plan-flash request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFlashRequest {
    pub target: String,
    pub os_id: String,
}

/// Plan-flash response payload.
///
/// Describes what a flash of `os_id` onto `target` would do. Nothing is
/// written; the `plan_id` must be presented to arm before it expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFlashResponse {
    pub plan_id: String,
    pub target: String,
    pub os_id: String,
    pub os_name: String,
    pub cache_key: String,
    /// Whether a verified image is already cached.
    pub cached: bool,
    /// Partitions that the write job will unmount first.
    #[serde(default)]
    pub mounted_partitions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
