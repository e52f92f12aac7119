//! Status reconciliation.
//!
//! Resolution order, evaluated fresh on every query:
//! 1. a completion code decides terminal status and wins over everything;
//! 2. otherwise a terminal status already on record is kept;
//! 3. otherwise a live pid means `running`, a dead one `stale`.
//!
//! Artifact read failures never fail a query. They are reported in
//! `status_note` and the last known status is returned.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use gsd_protocol::ops::{StatusResponse, TailResponse};
use gsd_protocol::{JobKind, JobStatus};
use gsd_worker::{read_completion_code, CompletionCode, JobPaths};

use super::process::{PidLiveness, SystemPids};
use super::record::JobRecord;
use super::store::{JobStore, StoreError};

/// Prefix of every `status_note` caused by an artifact read failure.
pub const ENRICH_ERROR_PREFIX: &str = "status_enrich_error:";

const TAIL_CHUNK_BYTES: u64 = 64 * 1024;

/// Derives the authoritative status of jobs from their artifacts.
#[derive(Clone)]
pub struct StatusResolver {
    store: JobStore,
    liveness: Arc<dyn PidLiveness>,
}

impl std::fmt::Debug for StatusResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusResolver")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

enum RcReading {
    Absent,
    Code(i32),
    Unparsable(String),
    Error(io::Error),
}

impl StatusResolver {
    pub fn new(store: JobStore) -> Self {
        Self::with_liveness(store, Arc::new(SystemPids))
    }

    pub fn with_liveness(store: JobStore, liveness: Arc<dyn PidLiveness>) -> Self {
        Self { store, liveness }
    }

    /// Current status of `job_id`.
    ///
    /// Fails only for an invalid id or a job with no record. A record that
    /// exists but cannot be read degrades to a view built from the
    /// completion code alone.
    pub fn status(&self, job_id: &str) -> Result<StatusResponse, StoreError> {
        match self.store.load(job_id) {
            Ok(record) => Ok(self.resolve(&record)),
            Err(err @ (StoreError::InvalidJobId(_) | StoreError::NotFound(_))) => Err(err),
            Err(err) => self.degraded(job_id, &err).ok_or(err),
        }
    }

    /// Resolve a loaded record.
    pub fn resolve(&self, record: &JobRecord) -> StatusResponse {
        let paths = JobPaths::new(self.store.jobs_dir(), &record.id);
        let mut view = StatusResponse {
            job_id: record.id.clone(),
            kind: record.kind,
            status: record.status,
            done: record.status.is_terminal(),
            exit_code: None,
            pid: record.pid,
            pid_alive: None,
            status_note: None,
            created_at: record.created_at,
            updated_at: record.updated_at,
            meta: record.meta.clone(),
        };

        match read_rc(&paths) {
            RcReading::Code(code) => return finish(view, code),
            RcReading::Unparsable(raw) => return finish_unparsable(view, raw),
            RcReading::Error(e) => {
                view.status_note = Some(format!("{} reading completion code: {}", ENRICH_ERROR_PREFIX, e));
                return view;
            }
            RcReading::Absent => {}
        }

        if record.status.is_terminal() {
            return view;
        }

        let alive = record.pid.map(|pid| self.liveness.is_alive(pid));
        view.pid_alive = alive;
        if alive == Some(true) {
            view.status = JobStatus::Running;
            view.done = false;
            return view;
        }

        // The worker may have written its code and exited between the two
        // reads; look once more before declaring it stale.
        match read_rc(&paths) {
            RcReading::Code(code) => finish(view, code),
            RcReading::Unparsable(raw) => finish_unparsable(view, raw),
            RcReading::Error(e) => {
                view.status_note = Some(format!("{} reading completion code: {}", ENRICH_ERROR_PREFIX, e));
                view
            }
            RcReading::Absent => {
                view.status = JobStatus::Stale;
                view.done = true;
                view
            }
        }
    }

    /// Last `max_lines` lines of the job log.
    pub fn tail(&self, job_id: &str, max_lines: usize) -> Result<TailResponse, StoreError> {
        let paths = self.store.paths(job_id)?;
        if !paths.record.exists() && !paths.log.exists() {
            return Err(StoreError::NotFound(job_id.to_string()));
        }

        let mut response = TailResponse {
            job_id: job_id.to_string(),
            lines: Vec::new(),
            truncated: false,
            status_note: None,
        };
        let (lines, truncated) = match read_last_lines(&paths.log, max_lines.max(1)) {
            Ok(found) => found,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(response),
            Err(e) => {
                response.status_note = Some(format!("{} reading log: {}", ENRICH_ERROR_PREFIX, e));
                return Ok(response);
            }
        };
        response.lines = lines;
        response.truncated = truncated;
        Ok(response)
    }

    fn degraded(&self, job_id: &str, err: &StoreError) -> Option<StatusResponse> {
        let kind = kind_from_id(job_id)?;
        let paths = self.store.paths(job_id).ok()?;
        let now = Utc::now();
        let view = StatusResponse {
            job_id: job_id.to_string(),
            kind,
            status: JobStatus::Running,
            done: false,
            exit_code: None,
            pid: None,
            pid_alive: None,
            status_note: Some(format!("{} reading job record: {}", ENRICH_ERROR_PREFIX, err)),
            created_at: now,
            updated_at: now,
            meta: Default::default(),
        };
        Some(match read_rc(&paths) {
            RcReading::Code(code) => finish(view, code),
            RcReading::Unparsable(raw) => finish_unparsable(view, raw),
            RcReading::Absent | RcReading::Error(_) => view,
        })
    }
}

/// Read backwards from the end of `path` in fixed chunks until `max_lines`
/// complete lines are in hand. Returns the lines and whether earlier lines
/// exist.
fn read_last_lines(path: &Path, max_lines: usize) -> io::Result<(Vec<String>, bool)> {
    let mut file = File::open(path)?;
    let mut pos = file.metadata()?.len();
    let mut buf: Vec<u8> = Vec::new();
    let mut newlines = 0usize;
    let mut at_eof = true;

    while pos > 0 && newlines < max_lines {
        let take = pos.min(TAIL_CHUNK_BYTES);
        pos -= take;
        let mut chunk = vec![0u8; take as usize];
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut chunk)?;

        let mut counted = chunk.iter().filter(|&&b| b == b'\n').count();
        // A final newline terminates the last line rather than starting one.
        if at_eof && chunk.last() == Some(&b'\n') {
            counted -= 1;
        }
        at_eof = false;
        newlines += counted;
        chunk.extend_from_slice(&buf);
        buf = chunk;
    }

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    let lines = lines[start..].iter().map(|l| l.to_string()).collect();
    Ok((lines, start > 0 || pos > 0))
}

fn read_rc(paths: &JobPaths) -> RcReading {
    match read_completion_code(&paths.rc) {
        Ok(None) | Ok(Some(CompletionCode::Empty)) => RcReading::Absent,
        Ok(Some(CompletionCode::Code(code))) => RcReading::Code(code),
        Ok(Some(CompletionCode::Unparsable(raw))) => RcReading::Unparsable(raw),
        Err(e) => RcReading::Error(e),
    }
}

fn finish(mut view: StatusResponse, code: i32) -> StatusResponse {
    view.status = JobStatus::from_exit_code(Some(code));
    view.done = true;
    view.exit_code = Some(code);
    view
}

fn finish_unparsable(mut view: StatusResponse, raw: String) -> StatusResponse {
    view.status = JobStatus::Failed;
    view.done = true;
    view.exit_code = None;
    view.status_note = Some(format!("unparsable completion code: {:?}", raw));
    view
}

fn kind_from_id(job_id: &str) -> Option<JobKind> {
    [JobKind::Download, JobKind::Flash]
        .into_iter()
        .find(|kind| job_id.starts_with(&format!("{}-", kind.id_prefix())))
}
