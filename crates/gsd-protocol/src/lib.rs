//! golden-sd protocol types
//!
//! Defines the JSON request/response envelope spoken by the supervising
//! process, the stable error-code registry, and the job vocabulary shared
//! with the detached worker.

pub mod error;
pub mod job;
pub mod ops;
pub mod request;
pub mod response;

pub use error::{ErrorClass, ErrorCode, RpcError};
pub use job::{JobKind, JobStatus};
pub use request::RpcRequest;
pub use response::RpcResponse;

/// Minimum protocol version supported by this implementation.
pub const PROTOCOL_MIN: i32 = 1;

/// Maximum protocol version supported by this implementation.
pub const PROTOCOL_MAX: i32 = 1;
