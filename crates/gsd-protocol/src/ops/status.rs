//! Status operation types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobKind, JobStatus};

/// Status request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    /// The job ID to query.
    pub job_id: String,
}

/// Status response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job_id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    /// Reconciled status.
    pub status: JobStatus,
    /// True once a completion code has been observed.
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Liveness of `pid` at query time, when it was checked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_alive: Option<bool>,
    /// Non-fatal annotation (artifact read failures and the like).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}
