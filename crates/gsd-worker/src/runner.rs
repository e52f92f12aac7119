//! Job execution.
//!
//! [`run_job`] is the body of `golden-sd worker run`. It executes a job
//! script step by step and guarantees that the completion-code artifact is
//! written exactly once on every exit path the process can observe: normal
//! completion, a failing step, a panic, or a termination signal.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::artifacts::{write_completion_code, JobPaths};
use crate::download::run_download;
use crate::error::{WorkerError, WorkerResult};
use crate::image::write_image;
use crate::log::{pump_lines, JobLog};
use crate::script::{JobScript, Step};

/// Exit codes reported in the completion-code artifact.
///
/// A failing `Exec` step reports the program's own exit code instead.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const INVALID_SCRIPT: i32 = 2;
    pub const DOWNLOAD_FAILED: i32 = 20;
    pub const CHECKSUM_MISMATCH: i32 = 21;
    pub const WRITE_FAILED: i32 = 30;
    pub const PANIC: i32 = 101;
    pub const SPAWN_FAILED: i32 = 127;
    pub const SIGNALLED: i32 = 143;
}

/// Pid of the step child currently running, shared with the signal handler.
#[derive(Debug, Clone, Default)]
pub struct ChildSlot(Arc<AtomicU32>);

impl ChildSlot {
    pub fn set(&self, pid: u32) {
        self.0.store(pid, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    pub fn current(&self) -> Option<u32> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Send SIGTERM to the tracked child, if any.
    pub fn terminate(&self) {
        let Some(pid) = self.current() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if let Ok(raw) = i32::try_from(pid) {
                let _ = signal::kill(Pid::from_raw(raw), Signal::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
        }
    }
}

/// Write-once guard around the completion-code artifact.
#[derive(Debug)]
pub struct Completion {
    rc_path: PathBuf,
    written: Mutex<bool>,
}

impl Completion {
    pub fn new(rc_path: impl Into<PathBuf>) -> Self {
        Self {
            rc_path: rc_path.into(),
            written: Mutex::new(false),
        }
    }

    /// Record `code` unless a code was already recorded. Returns whether
    /// this call wrote the artifact.
    pub fn record(&self, code: i32) -> bool {
        let mut written = match self.written.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *written {
            return false;
        }
        match write_completion_code(&self.rc_path, code) {
            Ok(()) => {
                *written = true;
                true
            }
            Err(e) => {
                eprintln!(
                    "golden-sd worker: cannot write {}: {}",
                    self.rc_path.display(),
                    e
                );
                false
            }
        }
    }

    pub fn is_recorded(&self) -> bool {
        match self.written.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Records [`exit_codes::PANIC`] if dropped during unwinding.
struct PanicGuard {
    completion: Arc<Completion>,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.completion.record(exit_codes::PANIC);
        }
    }
}

/// Execute job `job_id` from `jobs_dir` and return the recorded exit code.
pub fn run_job(jobs_dir: &Path, job_id: &str) -> i32 {
    let paths = JobPaths::new(jobs_dir, job_id);
    let completion = Arc::new(Completion::new(&paths.rc));

    let log = match JobLog::open(&paths.log) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("golden-sd worker: cannot open {}: {}", paths.log.display(), e);
            completion.record(exit_codes::WRITE_FAILED);
            return exit_codes::WRITE_FAILED;
        }
    };

    let child = ChildSlot::default();
    install_termination_handler(completion.clone(), child.clone(), log.clone());

    let code = tracing::subscriber::with_default(log.subscriber(), || {
        let _guard = PanicGuard {
            completion: completion.clone(),
        };
        execute(&paths, job_id, &log, &child)
    });
    completion.record(code);
    code
}

fn install_termination_handler(completion: Arc<Completion>, child: ChildSlot, log: JobLog) {
    let handler_log = log.clone();
    let result = ctrlc::set_handler(move || {
        handler_log.line("termination signal received; stopping job");
        child.terminate();
        completion.record(exit_codes::SIGNALLED);
        std::process::exit(exit_codes::SIGNALLED);
    });
    // Only one handler per process; a second job in the same process (tests)
    // runs without one.
    if let Err(e) = result {
        log.line(&format!("termination handler not installed: {}", e));
    }
}

fn execute(paths: &JobPaths, job_id: &str, log: &JobLog, child: &ChildSlot) -> i32 {
    let script = match JobScript::load(&paths.script) {
        Ok(script) => script,
        Err(e) => {
            error!(error = %e, "cannot load job script");
            return e.exit_code();
        }
    };
    if script.job_id != job_id {
        error!(script_job_id = %script.job_id, "job script belongs to another job");
        return exit_codes::INVALID_SCRIPT;
    }

    info!(job_id, kind = %script.kind, steps = script.steps.len(), "job started");
    for (index, step) in script.steps.iter().enumerate() {
        let number = index + 1;
        info!(step = number, "{}", step.describe());
        if let Err(e) = run_step(step, job_id, log, child) {
            let code = e.exit_code();
            error!(step = number, exit_code = code, error = %e, "step failed");
            return code;
        }
    }
    info!("job finished");
    exit_codes::OK
}

fn run_step(step: &Step, job_id: &str, log: &JobLog, child: &ChildSlot) -> WorkerResult<()> {
    match step {
        Step::Exec {
            argv,
            allow_failure,
        } => match run_exec(argv, log, child) {
            Err(e) if *allow_failure => {
                warn!(error = %e, "tolerated step failure");
                Ok(())
            }
            other => other,
        },
        Step::Download(download) => {
            let outcome = run_download(download, job_id)?;
            info!(bytes = outcome.bytes, attempts = outcome.attempts, "download step complete");
            Ok(())
        }
        Step::WriteImage(write) => {
            write_image(&write.source, write.format, &write.target, log, child)?;
            Ok(())
        }
    }
}

fn run_exec(argv: &[String], log: &JobLog, child: &ChildSlot) -> WorkerResult<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| WorkerError::Script("empty argv".to_string()))?;

    let mut proc = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| WorkerError::Spawn {
            program: program.clone(),
            source,
        })?;
    child.set(proc.id());

    let stdout_pump = pump_lines(proc.stdout.take(), log.clone(), "");
    let stderr_pump = pump_lines(proc.stderr.take(), log.clone(), "[stderr] ");
    let status = proc.wait();
    child.clear();
    for handle in [stdout_pump, stderr_pump].into_iter().flatten() {
        let _ = handle.join();
    }

    let status = status?;
    if status.success() {
        Ok(())
    } else {
        Err(WorkerError::StepExit {
            program: program.clone(),
            code: status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{read_completion_code, CompletionCode};
    use gsd_protocol::JobKind;
    use std::fs;
    use tempfile::TempDir;

    fn write_script(dir: &Path, job_id: &str, steps: Vec<Step>) {
        let script = JobScript::new(job_id, JobKind::Flash, steps);
        let paths = JobPaths::new(dir, job_id);
        fs::write(paths.script, serde_json::to_vec(&script).unwrap()).unwrap();
    }

    fn recorded(dir: &Path, job_id: &str) -> Option<CompletionCode> {
        read_completion_code(&JobPaths::new(dir, job_id).rc).unwrap()
    }

    #[test]
    fn test_successful_job_records_zero() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "fl-ok", vec![Step::exec(["echo", "hello from step"])]);

        assert_eq!(run_job(dir.path(), "fl-ok"), 0);
        assert_eq!(recorded(dir.path(), "fl-ok"), Some(CompletionCode::Code(0)));

        let log = fs::read_to_string(JobPaths::new(dir.path(), "fl-ok").log).unwrap();
        assert!(log.contains("hello from step"));
        assert!(log.contains("job finished"));
    }

    #[test]
    fn test_failing_step_stops_job() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        write_script(
            dir.path(),
            "fl-bad",
            vec![
                Step::exec(["sh", "-c", "exit 7"]),
                Step::exec(["touch".to_string(), marker.display().to_string()]),
            ],
        );

        assert_eq!(run_job(dir.path(), "fl-bad"), 7);
        assert_eq!(recorded(dir.path(), "fl-bad"), Some(CompletionCode::Code(7)));
        assert!(!marker.exists());
    }

    #[test]
    fn test_tolerant_step_continues() {
        let dir = TempDir::new().unwrap();
        write_script(
            dir.path(),
            "fl-tol",
            vec![
                Step::exec_tolerant(["false"]),
                Step::exec_tolerant(["golden-sd-no-such-program"]),
                Step::exec(["true"]),
            ],
        );

        assert_eq!(run_job(dir.path(), "fl-tol"), 0);
    }

    #[test]
    fn test_missing_program_reports_spawn_failure() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "fl-spawn", vec![Step::exec(["golden-sd-no-such-program"])]);

        assert_eq!(run_job(dir.path(), "fl-spawn"), exit_codes::SPAWN_FAILED);
    }

    #[test]
    fn test_missing_script_reports_invalid_script() {
        let dir = TempDir::new().unwrap();

        assert_eq!(run_job(dir.path(), "fl-none"), exit_codes::INVALID_SCRIPT);
        assert_eq!(
            recorded(dir.path(), "fl-none"),
            Some(CompletionCode::Code(exit_codes::INVALID_SCRIPT))
        );
    }

    #[test]
    fn test_completion_written_once() {
        let dir = TempDir::new().unwrap();
        let completion = Completion::new(dir.path().join("x.rc"));

        assert!(completion.record(143));
        assert!(!completion.record(0));
        assert!(completion.is_recorded());
        assert_eq!(fs::read_to_string(dir.path().join("x.rc")).unwrap(), "143\n");
    }

    #[test]
    fn test_panic_records_101() {
        let dir = TempDir::new().unwrap();
        let paths = JobPaths::new(dir.path(), "fl-panic");
        let completion = Arc::new(Completion::new(&paths.rc));

        let guarded = completion.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = PanicGuard { completion: guarded };
            panic!("step blew up");
        }));

        assert!(result.is_err());
        assert!(completion.is_recorded());
        // The exit path after the unwind must not overwrite the panic code.
        assert!(!completion.record(exit_codes::OK));
        assert_eq!(
            recorded(dir.path(), "fl-panic"),
            Some(CompletionCode::Code(exit_codes::PANIC))
        );
    }

    #[test]
    fn test_guard_is_silent_without_panic() {
        let dir = TempDir::new().unwrap();
        let completion = Arc::new(Completion::new(dir.path().join("quiet.rc")));

        drop(PanicGuard {
            completion: completion.clone(),
        });

        assert!(!completion.is_recorded());
        assert!(!dir.path().join("quiet.rc").exists());
    }

    #[test]
    fn test_child_slot_tracks_pid() {
        let slot = ChildSlot::default();
        assert_eq!(slot.current(), None);
        slot.set(4242);
        assert_eq!(slot.clone().current(), Some(4242));
        slot.clear();
        assert_eq!(slot.current(), None);
        slot.terminate();
    }
}
