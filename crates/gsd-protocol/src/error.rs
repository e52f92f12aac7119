//! Error types for the request/response protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned in error responses.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing required fields, or invalid field values.
    InvalidRequest,
    /// Job id outside the accepted character set.
    InvalidJobId,
    /// Protocol version is outside the supported range.
    UnsupportedProtocol,
    /// Unknown operation requested.
    UnknownOperation,
    /// No record exists for the job id.
    JobNotFound,
    /// `confirm_target` differs from `target`.
    ConfirmMismatch,
    /// Confirmation word differs from the configured write word.
    WrongWord,
    /// Target is not in the current eligible-target set.
    TargetNotEligible,
    /// Caller-supplied serial suffix does not match the target disk.
    SerialMismatch,
    /// No arm is active.
    NotArmed,
    /// The arm expired before it was consumed.
    Expired,
    /// Target differs from the armed target.
    TargetMismatch,
    /// OS id differs from the armed OS id.
    OsMismatch,
    /// Token differs from the armed token.
    InvalidToken,
    /// No live plan carries the given plan id.
    PlanNotFound,
    /// The plan expired before arm used it.
    PlanExpired,
    /// Target or OS id differs from the planned ones.
    PlanMismatch,
    /// OS id is not present in the catalog.
    UnknownOs,
    /// No verified cache entry exists for the image.
    CacheMissing,
    /// The detached worker could not be started.
    LaunchFailed,
    /// Unexpected internal failure (I/O, serialization).
    Internal,
}

impl ErrorCode {
    /// What the client should do about this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Expired
            | Self::NotArmed
            | Self::CacheMissing
            | Self::PlanNotFound
            | Self::PlanExpired => ErrorClass::Retry,
            Self::LaunchFailed | Self::Internal => ErrorClass::Broken,
            _ => ErrorClass::FixInput,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidJobId => "INVALID_JOB_ID",
            Self::UnsupportedProtocol => "UNSUPPORTED_PROTOCOL",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::ConfirmMismatch => "CONFIRM_MISMATCH",
            Self::WrongWord => "WRONG_WORD",
            Self::TargetNotEligible => "TARGET_NOT_ELIGIBLE",
            Self::SerialMismatch => "SERIAL_MISMATCH",
            Self::NotArmed => "NOT_ARMED",
            Self::Expired => "EXPIRED",
            Self::TargetMismatch => "TARGET_MISMATCH",
            Self::OsMismatch => "OS_MISMATCH",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::PlanNotFound => "PLAN_NOT_FOUND",
            Self::PlanExpired => "PLAN_EXPIRED",
            Self::PlanMismatch => "PLAN_MISMATCH",
            Self::UnknownOs => "UNKNOWN_OS",
            Self::CacheMissing => "CACHE_MISSING",
            Self::LaunchFailed => "LAUNCH_FAILED",
            Self::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Coarse guidance attached to every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Re-arm, re-download or simply try again.
    Retry,
    /// The request itself is wrong.
    FixInput,
    /// Something on the appliance is broken.
    Broken,
}

/// Error response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Stable, single-line reason string.
    pub message: String,
    /// Guidance derived from the code.
    pub class: ErrorClass,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Create a new error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            class: code.class(),
            data: None,
        }
    }

    /// Create a new error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(code, message)
        }
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create an INVALID_JOB_ID error.
    pub fn invalid_job_id() -> Self {
        Self::new(ErrorCode::InvalidJobId, "invalid job_id")
    }

    /// Create an UNSUPPORTED_PROTOCOL error.
    pub fn unsupported_protocol(version: i32, min: i32, max: i32) -> Self {
        Self::with_data(
            ErrorCode::UnsupportedProtocol,
            format!("protocol_version {} is outside supported range [{}, {}]", version, min, max),
            serde_json::json!({
                "requested": version,
                "min": min,
                "max": max
            }),
        )
    }

    /// Create an UNKNOWN_OPERATION error.
    pub fn unknown_operation(op: &str) -> Self {
        Self::with_data(
            ErrorCode::UnknownOperation,
            format!("unknown operation: {}", op),
            serde_json::json!({ "op": op }),
        )
    }

    /// Create a JOB_NOT_FOUND error.
    pub fn job_not_found(job_id: &str) -> Self {
        Self::with_data(
            ErrorCode::JobNotFound,
            format!("job '{}' not found", job_id),
            serde_json::json!({ "job_id": job_id }),
        )
    }

    /// Create an UNKNOWN_OS error.
    pub fn unknown_os(os_id: &str) -> Self {
        Self::with_data(
            ErrorCode::UnknownOs,
            format!("os '{}' not found in catalog", os_id),
            serde_json::json!({ "os_id": os_id }),
        )
    }

    /// Create a CACHE_MISSING error.
    pub fn cache_missing(os_id: &str, cache_key: &str) -> Self {
        Self::with_data(
            ErrorCode::CacheMissing,
            "image not in cache; run start_download first",
            serde_json::json!({ "os_id": os_id, "cache_key": cache_key }),
        )
    }

    /// Create an INTERNAL error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(ErrorCode::Expired.class(), ErrorClass::Retry);
        assert_eq!(ErrorCode::TargetMismatch.class(), ErrorClass::FixInput);
        assert_eq!(ErrorCode::InvalidJobId.class(), ErrorClass::FixInput);
        assert_eq!(ErrorCode::LaunchFailed.class(), ErrorClass::Broken);
    }

    #[test]
    fn test_error_serializes_code_and_class() {
        let err = RpcError::new(ErrorCode::InvalidToken, "invalid token");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "INVALID_TOKEN");
        assert_eq!(json["class"], "fix_input");
        assert_eq!(json["message"], "invalid token");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_display_matches_wire_code() {
        for code in [ErrorCode::NotArmed, ErrorCode::PlanNotFound, ErrorCode::PlanMismatch] {
            let wire = serde_json::to_value(code).unwrap();
            assert_eq!(wire, code.to_string());
        }
    }

    #[test]
    fn test_stale_plan_is_retryable() {
        assert_eq!(ErrorCode::PlanExpired.class(), ErrorClass::Retry);
        assert_eq!(ErrorCode::PlanNotFound.class(), ErrorClass::Retry);
        assert_eq!(ErrorCode::PlanMismatch.class(), ErrorClass::FixInput);
    }
}
