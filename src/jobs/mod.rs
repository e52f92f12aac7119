//! Background jobs
//!
//! A job is a detached worker plus four artifacts in the jobs directory.
//! The supervising process creates jobs ([`JobLauncher`]) and derives their
//! status on demand ([`StatusResolver`]); it never keeps jobs in memory.

mod id;
mod launcher;
mod process;
mod record;
mod resolver;
mod store;

pub use id::{generate_job_id, is_valid_job_id, JOB_ID_ALPHABET, JOB_ID_RANDOM_LEN};
pub use launcher::{JobLauncher, LaunchError};
pub use process::{PidLiveness, ProcessHandle, SystemPids};
pub use record::{JobArtifacts, JobRecord, RECORD_SCHEMA_VERSION};
pub use resolver::{StatusResolver, ENRICH_ERROR_PREFIX};
pub use store::{JobStore, StoreError};
