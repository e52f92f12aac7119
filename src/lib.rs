//! golden-sd - download-and-flash appliance backend
//!
//! This crate implements the supervising side of an appliance that
//! downloads OS images into a local cache and writes them to removable or
//! secondary storage. Every long-running operation runs in a detached
//! worker process; the supervisor only launches jobs, resolves their status
//! from on-disk artifacts, and gates destructive writes behind a
//! short-lived single-use arm token.

pub mod appliance;
pub mod arm;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod flash;
pub mod handlers;
pub mod jobs;
pub mod lock;
pub mod logging;
pub mod rpc;
pub mod targets;

pub use appliance::{Appliance, ApplianceError};
pub use arm::{ArmError, ArmGate, ArmState, Clock, ManualClock, PlanState, SystemClock};
pub use cache::{cache_key, CacheEntry, CacheError, DownloadCache, FetchOutcome};
pub use catalog::{normalize_query, search, CatalogFile, CatalogItem, OsCatalog, StaticCatalog};
pub use config::{Config, ConfigError};
pub use flash::{FlashError, FlashExecutor, FlashParams};
pub use jobs::{JobLauncher, JobRecord, JobStore, StatusResolver};
pub use rpc::RpcHandler;
pub use targets::{LsblkTargets, StaticTargets, TargetProvider, TargetSnapshot};

pub use gsd_protocol::{ErrorCode, JobKind, JobStatus, RpcError, RpcRequest, RpcResponse};
