//! Arm operation handler.
//!
//! Issues a short-lived single-use token binding one eligible target to one
//! OS image, against a live plan from `plan_flash`. The confirmation word is
//! compared after trimming and upper-casing.
//!
//! Typed inputs are checked before the target snapshot is taken, so a
//! failing `lsblk` never hides a confirmation error.

use gsd_protocol::ops::{ArmRequest, ArmResponse};
use gsd_protocol::{RpcError, RpcRequest};

use super::{parse_payload, require, to_payload};
use crate::appliance::Appliance;
use crate::arm::ArmParams;

/// Handle the arm operation.
pub fn handle(request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    let req: ArmRequest = parse_payload(request)?;
    require("target", &req.target)?;
    require("os_id", &req.os_id)?;

    let word = req.word.trim().to_uppercase();
    let params = ArmParams {
        plan_id: req.plan_id.trim(),
        target: req.target.trim(),
        os_id: req.os_id.trim(),
        confirm_target: req.confirm_target.trim(),
        word: &word,
        serial_suffix: req.serial_suffix.as_deref(),
    };
    app.gate().check_inputs(&params)?;
    require("plan_id", params.plan_id)?;

    let snapshot = app.targets().snapshot()?;
    let state = app.gate().arm(&params, &snapshot)?;

    to_payload(&ArmResponse {
        token: state.token,
        target: state.target,
        os_id: state.os_id,
        issued_at: state.issued_at,
        expires_at: state.expires_at,
    })
}
