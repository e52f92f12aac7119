//! Flash operation handler.

use gsd_protocol::ops::{FlashRequest, FlashResponse};
use gsd_protocol::{RpcError, RpcRequest};

use super::{parse_payload, require, to_payload};
use crate::appliance::Appliance;
use crate::flash::FlashParams;

/// Handle the flash operation.
pub fn handle(request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    let req: FlashRequest = parse_payload(request)?;
    require("target", &req.target)?;
    require("os_id", &req.os_id)?;
    require("token", &req.token)?;

    let params = FlashParams {
        target: req.target.trim(),
        os_id: req.os_id.trim(),
        token: req.token.trim(),
        confirm_target: req.confirm_target.trim(),
        serial_suffix: req.serial_suffix.as_deref(),
    };
    let job = app.flash_executor().flash(&params)?;

    to_payload(&FlashResponse { job_id: job.id })
}
