//! Status operation handler.
//!
//! Resolves a job's effective status from its record, completion code and
//! process liveness.

use gsd_protocol::ops::StatusRequest;
use gsd_protocol::{RpcError, RpcRequest};

use super::{parse_payload, to_payload};
use crate::appliance::Appliance;

/// Handle the status operation.
pub fn handle(request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    let req: StatusRequest = parse_payload(request)?;
    let response = app.resolver().status(&req.job_id)?;
    to_payload(&response)
}
