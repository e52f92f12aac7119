//! golden-sd worker runtime
//!
//! The worker is the detached half of every job. The supervising process
//! writes a [`JobScript`] next to the job's other artifacts and starts the
//! worker in its own session; the worker executes the steps, appends to the
//! job log and, on every exit path it can observe, records its exit code in
//! the completion-code artifact.
//!
//! Nothing in this crate shells out through a string interpreter: every
//! external program is invoked with an explicit argument list.

pub mod artifacts;
pub mod download;
pub mod error;
pub mod image;
pub mod log;
pub mod runner;
pub mod script;

pub use artifacts::{
    parse_completion_code, read_completion_code, write_completion_code, write_json_atomic,
    CompletionCode, JobPaths,
};
pub use download::{CacheMeta, CacheState, DownloadOutcome};
pub use error::{WorkerError, WorkerResult};
pub use image::ImageFormat;
pub use runner::{run_job, ChildSlot, Completion, exit_codes};
pub use script::{DownloadStep, JobScript, Step, WriteImageStep, SCRIPT_SCHEMA_VERSION};
