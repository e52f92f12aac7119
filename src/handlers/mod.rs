//! Operation handlers for the supervisor RPC.
//!
//! Each operation has its own handler module that parses its payload,
//! calls into the appliance and serializes the response. Failures of the
//! underlying modules are mapped onto the stable error registry here, in
//! one place per error type.

pub mod arm;
pub mod arm_status;
pub mod disarm;
pub mod flash;
pub mod os;
pub mod plan_flash;
pub mod safety;
pub mod start_download;
pub mod status;
pub mod tail;
pub mod targets;

use gsd_protocol::{ErrorCode, RpcError, RpcRequest};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::arm::ArmError;
use crate::cache::CacheError;
use crate::catalog::CatalogError;
use crate::flash::FlashError;
use crate::jobs::{LaunchError, StoreError};
use crate::targets::TargetError;

/// Deserialize the request payload, naming the operation on failure.
pub(crate) fn parse_payload<T: DeserializeOwned>(request: &RpcRequest) -> Result<T, RpcError> {
    serde_json::from_value(request.payload.clone())
        .map_err(|e| RpcError::invalid_request(format!("invalid {} request: {}", request.op, e)))
}

pub(crate) fn to_payload<T: Serialize>(response: &T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(response)
        .map_err(|e| RpcError::internal(format!("failed to serialize response: {}", e)))
}

/// Reject blank required string fields.
pub(crate) fn require(field: &str, value: &str) -> Result<(), RpcError> {
    if value.trim().is_empty() {
        return Err(RpcError::invalid_request(format!("{} is required", field)));
    }
    Ok(())
}

impl From<StoreError> for RpcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidJobId(_) => RpcError::invalid_job_id(),
            StoreError::NotFound(job_id) => RpcError::job_not_found(&job_id),
            other => RpcError::internal(other.to_string()),
        }
    }
}

impl From<ArmError> for RpcError {
    fn from(err: ArmError) -> Self {
        let code = match &err {
            ArmError::ConfirmMismatch => ErrorCode::ConfirmMismatch,
            ArmError::WrongWord => ErrorCode::WrongWord,
            ArmError::TargetNotEligible(target) => {
                return RpcError::with_data(
                    ErrorCode::TargetNotEligible,
                    err.to_string(),
                    json!({ "target": target }),
                )
            }
            ArmError::SerialMismatch => ErrorCode::SerialMismatch,
            ArmError::NotArmed => ErrorCode::NotArmed,
            ArmError::Expired => ErrorCode::Expired,
            ArmError::TargetMismatch => ErrorCode::TargetMismatch,
            ArmError::OsMismatch => ErrorCode::OsMismatch,
            ArmError::InvalidToken => ErrorCode::InvalidToken,
            ArmError::PlanNotFound => ErrorCode::PlanNotFound,
            ArmError::PlanExpired => ErrorCode::PlanExpired,
            ArmError::PlanMismatch => ErrorCode::PlanMismatch,
            ArmError::Lock(_) | ArmError::Io(_) => ErrorCode::Internal,
        };
        RpcError::new(code, err.to_string())
    }
}

impl From<LaunchError> for RpcError {
    fn from(err: LaunchError) -> Self {
        RpcError::new(ErrorCode::LaunchFailed, err.to_string())
    }
}

impl From<CacheError> for RpcError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Launch(e) => e.into(),
            CacheError::Io(e) => RpcError::internal(format!("cache I/O: {}", e)),
        }
    }
}

impl From<CatalogError> for RpcError {
    fn from(err: CatalogError) -> Self {
        RpcError::internal(err.to_string())
    }
}

impl From<TargetError> for RpcError {
    fn from(err: TargetError) -> Self {
        RpcError::internal(format!("target discovery failed: {}", err))
    }
}

impl From<FlashError> for RpcError {
    fn from(err: FlashError) -> Self {
        match err {
            FlashError::TargetNotEligible(target) => ArmError::TargetNotEligible(target).into(),
            FlashError::ConfirmMismatch => ArmError::ConfirmMismatch.into(),
            FlashError::SerialMismatch => ArmError::SerialMismatch.into(),
            FlashError::Arm(e) => e.into(),
            FlashError::UnknownOs(os_id) => RpcError::unknown_os(&os_id),
            FlashError::CacheMissing { os_id, cache_key } => RpcError::cache_missing(&os_id, &cache_key),
            FlashError::Targets(e) => e.into(),
            FlashError::Catalog(e) => e.into(),
            FlashError::Launch(e) => e.into(),
        }
    }
}
