//! Worker error types.

use std::io;

use thiserror::Error;

use crate::runner::exit_codes;

/// Errors raised while executing a job script.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid job script: {0}")]
    Script(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {}", describe_exit(.code))]
    StepExit { program: String, code: Option<i32> },

    #[error("download failed after {attempts} attempt(s): {last_error}")]
    DownloadExhausted { attempts: u32, last_error: String },

    #[error("download rejected: {0}")]
    DownloadRejected(String),

    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("image write failed: {0}")]
    Write(String),
}

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

impl WorkerError {
    /// Exit code the worker reports when a step fails with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerError::Script(_) => exit_codes::INVALID_SCRIPT,
            WorkerError::Spawn { .. } => exit_codes::SPAWN_FAILED,
            WorkerError::StepExit { code, .. } => match code {
                Some(0) | None => exit_codes::SIGNALLED,
                Some(c) => *c,
            },
            WorkerError::DownloadExhausted { .. } | WorkerError::DownloadRejected(_) => {
                exit_codes::DOWNLOAD_FAILED
            }
            WorkerError::ChecksumMismatch { .. } => exit_codes::CHECKSUM_MISMATCH,
            WorkerError::Write(_) => exit_codes::WRITE_FAILED,
            WorkerError::Io(_) => exit_codes::WRITE_FAILED,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "a signal".to_string(),
    }
}
