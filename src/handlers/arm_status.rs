//! Arm-status operation handler.
//!
//! Never returns the token.

use gsd_protocol::ops::ArmStatusResponse;
use gsd_protocol::{RpcError, RpcRequest};

use super::to_payload;
use crate::appliance::Appliance;

pub fn handle(_request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    to_payload(&current(app)?)
}

/// The live arm as reported to clients.
pub(crate) fn current(app: &Appliance) -> Result<ArmStatusResponse, RpcError> {
    Ok(match app.gate().status()? {
        Some(state) => ArmStatusResponse {
            active: true,
            target: Some(state.target),
            os_id: Some(state.os_id),
            expires_at: Some(state.expires_at),
        },
        None => ArmStatusResponse::default(),
    })
}
