//! Targets operation handler.

use gsd_protocol::{RpcError, RpcRequest};

use super::to_payload;
use crate::appliance::Appliance;

/// Handle the targets operation. The payload is ignored.
pub fn handle(_request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    let snapshot = app.targets().snapshot()?;
    to_payload(&snapshot.into_response())
}
