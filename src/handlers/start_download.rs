//! Start-download operation handler.
//!
//! Returns the cached image when a verified entry exists, otherwise launches
//! a download job and returns its id.

use std::time::Duration;

use gsd_protocol::ops::{StartDownloadRequest, StartDownloadResponse};
use gsd_protocol::{RpcError, RpcRequest};
use tracing::warn;

use super::{parse_payload, require, to_payload};
use crate::appliance::Appliance;
use crate::cache::FetchOutcome;

/// Partial downloads older than this belong to dead workers.
const STALE_PARTIAL_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Handle the start_download operation.
pub fn handle(request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    let req: StartDownloadRequest = parse_payload(request)?;
    require("os_id", &req.os_id)?;
    let os_id = req.os_id.trim();

    let item = app
        .catalog()
        .lookup(os_id)?
        .ok_or_else(|| RpcError::unknown_os(os_id))?;
    let expected = item.expected_sha256();

    if let Err(e) = app.cache().sweep_partials(STALE_PARTIAL_AGE) {
        warn!(error = %e, "could not sweep partial downloads");
    }

    let outcome = app
        .cache()
        .fetch(os_id, &item.url, expected.as_deref(), app.launcher())?;

    let entry = outcome.entry();
    let response = StartDownloadResponse {
        cached: matches!(outcome, FetchOutcome::Cached(_)),
        cache_key: entry.key.clone(),
        job_id: match &outcome {
            FetchOutcome::Started { job, .. } => Some(job.id.clone()),
            FetchOutcome::Cached(_) => None,
        },
        binary_path: entry.binary_path.display().to_string(),
    };
    to_payload(&response)
}
