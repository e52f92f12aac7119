//! Tail operation handler.

use gsd_protocol::ops::TailRequest;
use gsd_protocol::{RpcError, RpcRequest};

use super::{parse_payload, to_payload};
use crate::appliance::Appliance;

/// Handle the tail operation.
pub fn handle(request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    let req: TailRequest = parse_payload(request)?;
    let response = app.resolver().tail(&req.job_id, req.effective_max_lines())?;
    to_payload(&response)
}
