//! Disarm operation handler.

use gsd_protocol::ops::DisarmResponse;
use gsd_protocol::{RpcError, RpcRequest};

use super::to_payload;
use crate::appliance::Appliance;

/// Handle the disarm operation. Succeeds whether or not an arm existed.
pub fn handle(_request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    app.gate().disarm()?;
    to_payload(&DisarmResponse { active: false })
}
