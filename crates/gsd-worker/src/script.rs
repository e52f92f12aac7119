//! Job script model.
//!
//! A job script is a closed list of typed steps serialized as JSON. The
//! worker never interprets strings as shell code; `Exec` steps carry an
//! argument vector and every other step is implemented natively.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gsd_protocol::JobKind;
use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};
use crate::image::ImageFormat;

/// Schema version for `<id>.script`.
pub const SCRIPT_SCHEMA_VERSION: u32 = 1;

/// The unit of work handed to a detached worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobScript {
    pub schema_version: u32,
    pub job_id: String,
    pub kind: JobKind,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<Step>,
}

impl JobScript {
    pub fn new(job_id: impl Into<String>, kind: JobKind, steps: Vec<Step>) -> Self {
        Self {
            schema_version: SCRIPT_SCHEMA_VERSION,
            job_id: job_id.into(),
            kind,
            created_at: Utc::now(),
            steps,
        }
    }

    /// Load and sanity-check a script file.
    pub fn load(path: &Path) -> WorkerResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| WorkerError::Script(format!("cannot read {}: {}", path.display(), e)))?;
        let script: JobScript =
            serde_json::from_str(&raw).map_err(|e| WorkerError::Script(e.to_string()))?;
        script.validate()?;
        Ok(script)
    }

    /// Reject scripts this worker cannot execute faithfully.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.schema_version != SCRIPT_SCHEMA_VERSION {
            return Err(WorkerError::Script(format!(
                "unsupported schema_version {}",
                self.schema_version
            )));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if let Step::Exec { argv, .. } = step {
                if argv.is_empty() || argv[0].is_empty() {
                    return Err(WorkerError::Script(format!("step {} has an empty argv", index)));
                }
            }
        }
        Ok(())
    }
}

/// One step of a job script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Run a program with an explicit argument vector.
    Exec {
        argv: Vec<String>,
        /// Log and continue when the program exits nonzero.
        #[serde(default)]
        allow_failure: bool,
    },
    /// Fetch a URL into the download cache.
    Download(DownloadStep),
    /// Stream a (possibly compressed) image onto a block device.
    WriteImage(WriteImageStep),
}

impl Step {
    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Step::Exec {
            argv: argv.into_iter().map(Into::into).collect(),
            allow_failure: false,
        }
    }

    pub fn exec_tolerant<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Step::Exec {
            argv: argv.into_iter().map(Into::into).collect(),
            allow_failure: true,
        }
    }

    /// One-line description for the job log.
    pub fn describe(&self) -> String {
        match self {
            Step::Exec { argv, .. } => format!("exec {}", argv.join(" ")),
            Step::Download(d) => format!("download {} -> {}", d.url, d.final_path.display()),
            Step::WriteImage(w) => format!(
                "write {} image {} -> {}",
                w.format,
                w.source.display(),
                w.target.display()
            ),
        }
    }
}

/// Parameters of a cache download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadStep {
    pub cache_key: String,
    pub os_id: String,
    pub url: String,
    pub format: ImageFormat,
    /// Per-job partial file; never the canonical path.
    pub temp_path: PathBuf,
    /// Canonical binary path, only ever reached by rename.
    pub final_path: PathBuf,
    pub meta_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_sha256: Option<String>,
    pub attempts: u32,
    pub timeout_secs: u64,
    #[serde(default)]
    pub backoff_secs: u64,
}

/// Parameters of an image write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteImageStep {
    pub source: PathBuf,
    pub format: ImageFormat,
    pub target: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_wire_format() {
        let step = Step::exec(["umount", "/dev/sdb1"]);
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step"], "exec");
        assert_eq!(json["argv"][1], "/dev/sdb1");
        assert_eq!(json["allow_failure"], false);

        let write = Step::WriteImage(WriteImageStep {
            source: PathBuf::from("/cache/k.bin"),
            format: ImageFormat::Xz,
            target: PathBuf::from("/dev/sdb"),
        });
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["step"], "write_image");
        assert_eq!(json["format"], "xz");
    }

    #[test]
    fn test_load_rejects_empty_argv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.script");
        let script = JobScript::new("x", JobKind::Flash, vec![Step::Exec { argv: vec![], allow_failure: false }]);
        fs::write(&path, serde_json::to_string(&script).unwrap()).unwrap();

        let err = JobScript::load(&path).unwrap_err();
        assert!(matches!(err, WorkerError::Script(_)));
    }

    #[test]
    fn test_load_rejects_unknown_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.script");
        let mut script = JobScript::new("x", JobKind::Download, vec![Step::exec(["true"])]);
        script.schema_version = 99;
        fs::write(&path, serde_json::to_string(&script).unwrap()).unwrap();

        assert!(JobScript::load(&path).is_err());
    }

    #[test]
    fn test_describe_is_single_line() {
        let step = Step::exec_tolerant(["blockdev", "--rereadpt", "/dev/sdb"]);
        assert_eq!(step.describe(), "exec blockdev --rereadpt /dev/sdb");
        assert!(!step.describe().contains('\n'));
    }
}
