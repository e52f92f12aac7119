//! Plan-flash operation handler.
//!
//! Checks that `os_id` is in the catalog and `target` is eligible right
//! now, then records a plan the arm operation must present. Writes nothing
//! to any disk.

use gsd_protocol::ops::{PlanFlashRequest, PlanFlashResponse};
use gsd_protocol::{RpcError, RpcRequest};

use super::{parse_payload, require, to_payload};
use crate::appliance::Appliance;
use crate::arm::ArmError;

pub fn handle(request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    let req: PlanFlashRequest = parse_payload(request)?;
    require("target", &req.target)?;
    require("os_id", &req.os_id)?;
    let target = req.target.trim();
    let os_id = req.os_id.trim();

    let item = app
        .catalog()
        .lookup(os_id)?
        .ok_or_else(|| RpcError::unknown_os(os_id))?;

    let snapshot = app.targets().snapshot()?;
    let disk = snapshot
        .eligible(target)
        .ok_or_else(|| ArmError::TargetNotEligible(target.to_string()))?;

    let expected = item.expected_sha256();
    let cached = app
        .cache()
        .valid_entry(os_id, &item.url, expected.as_deref())
        .is_some();
    let cache_key = app.cache().entry(os_id, &item.url).key;

    let plan = app.gate().plan(target, os_id)?;

    to_payload(&PlanFlashResponse {
        plan_id: plan.plan_id,
        target: plan.target,
        os_id: plan.os_id,
        os_name: item.name,
        cache_key,
        cached,
        mounted_partitions: disk.mounted_partitions.clone(),
        created_at: plan.created_at,
        expires_at: plan.expires_at,
    })
}
