//! Operation-specific types.

pub mod arm;
pub mod download;
pub mod flash;
pub mod os;
pub mod plan;
pub mod safety;
pub mod status;
pub mod tail;
pub mod targets;

pub use arm::{ArmRequest, ArmResponse, ArmStatusResponse, DisarmResponse};
pub use download::{StartDownloadRequest, StartDownloadResponse};
pub use flash::{FlashRequest, FlashResponse};
pub use os::{OsItem, OsSearchRequest, OsSearchResponse};
pub use plan::{PlanFlashRequest, PlanFlashResponse};
pub use safety::{SafetyPolicy, SafetyResponse};
pub use status::{StatusRequest, StatusResponse};
pub use tail::{TailRequest, TailResponse};
pub use targets::{BootMode, DiskReport, TargetsResponse};

/// Known operation names.
pub mod names {
    pub const START_DOWNLOAD: &str = "start_download";
    pub const STATUS: &str = "status";
    pub const TAIL: &str = "tail";
    pub const ARM: &str = "arm";
    pub const ARM_STATUS: &str = "arm_status";
    pub const DISARM: &str = "disarm";
    pub const FLASH: &str = "flash";
    pub const TARGETS: &str = "targets";
    pub const PLAN_FLASH: &str = "plan_flash";
    pub const SAFETY: &str = "safety";
    pub const OS: &str = "os";
}
