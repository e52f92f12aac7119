//! Per-job artifact layout and the completion-code file.
//!
//! Every job owns four files in the jobs directory, all named after the job
//! id: `<id>.script`, `<id>.log`, `<id>.rc` and `<id>.json`. The `.rc` file
//! holds exactly the worker's decimal exit code and is the only fact status
//! resolution trusts for terminal status.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Paths of one job's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// Serialized [`crate::JobScript`].
    pub script: PathBuf,
    /// Append-only worker log.
    pub log: PathBuf,
    /// Completion-code artifact.
    pub rc: PathBuf,
    /// Serialized job record (owned by the supervising process).
    pub record: PathBuf,
}

impl JobPaths {
    /// Derive artifact paths for `job_id` under `jobs_dir`.
    ///
    /// The caller is responsible for validating `job_id` first.
    pub fn new(jobs_dir: &Path, job_id: &str) -> Self {
        Self {
            script: jobs_dir.join(format!("{}.script", job_id)),
            log: jobs_dir.join(format!("{}.log", job_id)),
            rc: jobs_dir.join(format!("{}.rc", job_id)),
            record: jobs_dir.join(format!("{}.json", job_id)),
        }
    }
}

/// Parsed content of a completion-code artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionCode {
    /// File exists but holds nothing yet.
    Empty,
    /// A decimal exit code.
    Code(i32),
    /// Non-empty content that is not an integer.
    Unparsable(String),
}

/// Interpret the raw text of a completion-code file.
pub fn parse_completion_code(raw: &str) -> CompletionCode {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CompletionCode::Empty;
    }
    match trimmed.parse::<i32>() {
        Ok(code) => CompletionCode::Code(code),
        Err(_) => CompletionCode::Unparsable(trimmed.chars().take(32).collect()),
    }
}

/// Read a completion-code file. `Ok(None)` when it does not exist.
pub fn read_completion_code(path: &Path) -> io::Result<Option<CompletionCode>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(parse_completion_code(&raw))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write a completion-code file via temp + rename so readers never see a
/// partial value.
pub fn write_completion_code(path: &Path, code: i32) -> io::Result<()> {
    let tmp = path.with_extension("rc.tmp");
    fs::write(&tmp, format!("{}\n", code))?;
    fs::rename(&tmp, path)
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}
