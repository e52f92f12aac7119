//! Job record store.
//!
//! Records live as `<jobs_dir>/<job_id>.json` next to the worker artifacts.
//! Every public entry point validates the job id before touching the
//! filesystem.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gsd_worker::{write_json_atomic, JobPaths};
use thiserror::Error;

use super::id::is_valid_job_id;
use super::record::JobRecord;

/// Errors from the job store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid job_id")]
    InvalidJobId(String),

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt job record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Directory of job records and artifacts.
#[derive(Debug, Clone)]
pub struct JobStore {
    jobs_dir: PathBuf,
}

impl JobStore {
    pub fn new(jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
        }
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    /// Create the jobs directory if needed.
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.jobs_dir)
    }

    /// Artifact paths for a validated job id.
    pub fn paths(&self, job_id: &str) -> Result<JobPaths, StoreError> {
        if !is_valid_job_id(job_id) {
            return Err(StoreError::InvalidJobId(job_id.to_string()));
        }
        Ok(JobPaths::new(&self.jobs_dir, job_id))
    }

    /// Persist a record atomically.
    pub fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let paths = self.paths(&record.id)?;
        write_json_atomic(&paths.record, record)?;
        Ok(())
    }

    /// Load the record for `job_id`.
    pub fn load(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        let paths = self.paths(job_id)?;
        let raw = match fs::read_to_string(&paths.record) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(job_id.to_string()))
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(JobRecord::from_json(&raw)?)
    }

    /// Whether a record exists for `job_id`.
    pub fn exists(&self, job_id: &str) -> Result<bool, StoreError> {
        Ok(self.paths(job_id)?.record.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsd_protocol::JobKind;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs"));
        let paths = store.paths("dl-abc").unwrap();
        let record = JobRecord::launched("dl-abc", JobKind::Download, 1, &paths, BTreeMap::new());

        store.save(&record).unwrap();

        assert!(store.exists("dl-abc").unwrap());
        assert_eq!(store.load("dl-abc").unwrap(), record);
    }

    #[test]
    fn test_missing_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());

        assert!(matches!(store.load("dl-missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_invalid_id_never_touches_disk() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs"));

        assert!(matches!(store.load("../secret"), Err(StoreError::InvalidJobId(_))));
        assert!(matches!(store.paths("a/b"), Err(StoreError::InvalidJobId(_))));
        assert!(!dir.path().join("jobs").exists());
    }

    #[test]
    fn test_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        fs::write(dir.path().join("dl-bad.json"), "{not json").unwrap();

        assert!(matches!(store.load("dl-bad"), Err(StoreError::Json(_))));
    }
}
