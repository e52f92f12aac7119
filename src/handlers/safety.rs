//! Safety operation handler.
//!
//! Reports the write policy together with the live arm and the currently
//! eligible targets. A failing target listing degrades to an empty list
//! with a `status_note` instead of failing the report.

use gsd_protocol::ops::{BootMode, SafetyPolicy, SafetyResponse};
use gsd_protocol::{RpcError, RpcRequest};

use super::{arm_status, to_payload};
use crate::appliance::Appliance;

pub fn handle(_request: &RpcRequest, app: &Appliance) -> Result<serde_json::Value, RpcError> {
    let gate = app.gate();
    let armed = arm_status::current(app)?;

    let (mode, eligible_targets, status_note) = match app.targets().snapshot() {
        Ok(snapshot) => {
            let eligible: Vec<_> = snapshot.disks.into_iter().filter(|d| d.allowed).collect();
            (snapshot.mode, eligible, None)
        }
        Err(e) => (BootMode::Unknown, Vec::new(), Some(format!("target discovery failed: {}", e))),
    };

    to_payload(&SafetyResponse {
        policy: SafetyPolicy {
            write_word: gate.write_word().to_string(),
            arm_ttl_seconds: gate.ttl().as_secs(),
            plan_ttl_seconds: gate.plan_ttl().as_secs(),
            plan_required: true,
            root_disk_blocked: true,
            can_flash_here: mode != BootMode::Unknown,
        },
        mode,
        armed,
        eligible_targets,
        status_note,
    })
}
