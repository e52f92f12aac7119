//! Detached job launch.
//!
//! Launch order is fixed: script, worker, record. The worker is spawned in
//! its own session so it survives the request handler. The record is
//! persisted before `start` returns, so an immediate status query always
//! finds it; if the worker cannot be spawned no record is written at all.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;

use gsd_protocol::JobKind;
use gsd_worker::{write_json_atomic, JobScript, Step, WorkerError};
use thiserror::Error;
use tracing::{info, warn};

use super::id::generate_job_id;
use super::record::JobRecord;
use super::store::{JobStore, StoreError};

/// Errors from [`JobLauncher::start`]
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("job store: {0}")]
    Store(#[from] StoreError),

    #[error("job '{0}' already exists")]
    Duplicate(String),

    #[error("invalid job script: {0}")]
    Script(#[from] WorkerError),

    #[error("failed to write job artifacts: {0}")]
    Io(#[from] io::Error),

    #[error("failed to spawn worker {exe}: {source}")]
    Spawn {
        exe: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Starts detached workers and records them.
#[derive(Debug, Clone)]
pub struct JobLauncher {
    store: JobStore,
    worker_exe: PathBuf,
}

impl JobLauncher {
    /// `worker_exe` is invoked as `<exe> worker run --jobs-dir <dir> --job-id <id>`.
    pub fn new(store: JobStore, worker_exe: impl Into<PathBuf>) -> Self {
        Self {
            store,
            worker_exe: worker_exe.into(),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn worker_exe(&self) -> &Path {
        &self.worker_exe
    }

    /// Allocate an id for a job that will be started with [`Self::start_with_id`].
    pub fn new_job_id(&self, kind: JobKind) -> String {
        generate_job_id(kind)
    }

    /// Launch `steps` under a fresh id.
    pub fn start(
        &self,
        kind: JobKind,
        steps: Vec<Step>,
        meta: BTreeMap<String, String>,
    ) -> Result<JobRecord, LaunchError> {
        self.start_with_id(self.new_job_id(kind), kind, steps, meta)
    }

    /// Launch `steps` under a caller-allocated id.
    pub fn start_with_id(
        &self,
        job_id: String,
        kind: JobKind,
        steps: Vec<Step>,
        meta: BTreeMap<String, String>,
    ) -> Result<JobRecord, LaunchError> {
        let paths = self.store.paths(&job_id)?;
        if paths.record.exists() || paths.script.exists() {
            return Err(LaunchError::Duplicate(job_id));
        }
        self.store.ensure_dir()?;

        let script = JobScript::new(job_id.clone(), kind, steps);
        script.validate()?;
        write_json_atomic(&paths.script, &script)?;

        let child = match self.spawn_worker(&job_id, &paths.log) {
            Ok(child) => child,
            Err(source) => {
                let _ = fs::remove_file(&paths.script);
                return Err(LaunchError::Spawn {
                    exe: self.worker_exe.clone(),
                    source,
                });
            }
        };
        let pid = child.id();

        let record = JobRecord::launched(job_id.clone(), kind, pid, &paths, meta);
        if let Err(e) = self.store.save(&record) {
            // No record means nobody can ever observe this worker; stop it.
            terminate_session(pid);
            reap(child);
            let _ = fs::remove_file(&paths.script);
            return Err(e.into());
        }
        reap(child);

        info!(job_id = %job_id, kind = %kind, pid, "job launched");
        Ok(record)
    }

    fn spawn_worker(&self, job_id: &str, log_path: &Path) -> io::Result<Child> {
        let log = OpenOptions::new().create(true).append(true).open(log_path)?;
        let mut cmd = Command::new(&self.worker_exe);
        cmd.arg("worker")
            .arg("run")
            .arg("--jobs-dir")
            .arg(self.store.jobs_dir())
            .arg("--job-id")
            .arg(job_id)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;

            // SAFETY: setsid is async-signal-safe and touches no Rust state.
            unsafe {
                cmd.pre_exec(|| {
                    nix::unistd::setsid()
                        .map(|_| ())
                        .map_err(io::Error::from)
                });
            }
        }

        cmd.spawn()
    }
}

/// Wait for the worker in the background so it never lingers as a zombie
/// of a long-lived launcher.
fn reap(mut child: Child) {
    let spawned = thread::Builder::new()
        .name(format!("reap-{}", child.id()))
        .spawn(move || {
            let _ = child.wait();
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not start reaper thread");
    }
}

#[cfg(unix)]
fn terminate_session(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Ok(raw) = i32::try_from(pid) {
        let _ = killpg(Pid::from_raw(raw), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_session(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_spawn_failure_leaves_no_record() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs"));
        let launcher = JobLauncher::new(store.clone(), dir.path().join("no-such-worker"));

        let err = launcher
            .start_with_id("dl-spawnfail".into(), JobKind::Download, vec![Step::exec(["true"])], BTreeMap::new())
            .unwrap_err();

        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(matches!(store.load("dl-spawnfail"), Err(StoreError::NotFound(_))));
        assert!(!store.paths("dl-spawnfail").unwrap().script.exists());
    }

    #[test]
    fn test_invalid_script_rejected_before_spawn() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let launcher = JobLauncher::new(store, "/bin/true");

        let err = launcher
            .start(JobKind::Flash, vec![Step::exec(Vec::<String>::new())], BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, LaunchError::Script(_)));
    }

    #[test]
    fn test_invalid_job_id_rejected() {
        let dir = TempDir::new().unwrap();
        let launcher = JobLauncher::new(JobStore::new(dir.path()), "/bin/true");

        let err = launcher
            .start_with_id("../x".into(), JobKind::Flash, vec![], BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, LaunchError::Store(StoreError::InvalidJobId(_))));
    }

    #[test]
    fn test_record_written_before_return() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path().join("jobs"));
        // `true` ignores its arguments, standing in for a worker that exits
        // without a completion code.
        let launcher = JobLauncher::new(store.clone(), "true");

        let record = launcher
            .start(JobKind::Download, vec![Step::exec(["true"])], BTreeMap::new())
            .unwrap();

        let loaded = store.load(&record.id).unwrap();
        assert_eq!(loaded.id, record.id);
        assert!(loaded.pid.is_some());
        assert!(store.paths(&record.id).unwrap().script.exists());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path());
        let launcher = JobLauncher::new(store, "true");

        launcher
            .start_with_id("fl-dup".into(), JobKind::Flash, vec![], BTreeMap::new())
            .unwrap();
        let err = launcher
            .start_with_id("fl-dup".into(), JobKind::Flash, vec![], BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, LaunchError::Duplicate(_)));
    }
}
