//! Job vocabulary shared by the launcher, the resolver and the worker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Fetch an OS image into the download cache.
    Download,
    /// Write a cached OS image onto a block device.
    Flash,
}

impl JobKind {
    /// Short prefix used when generating job ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            JobKind::Download => "dl",
            JobKind::Flash => "fl",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Download => write!(f, "download"),
            JobKind::Flash => write!(f, "flash"),
        }
    }
}

/// Observable job status.
///
/// `Success` and `Failed` are terminal. `Stale` means the worker vanished
/// without leaving a completion code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    Stale,
}

impl JobStatus {
    /// Whether no further status change is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// Status implied by a worker exit code.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => JobStatus::Success,
            _ => JobStatus::Failed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Stale => "stale",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Stale.is_terminal());
    }

    #[test]
    fn test_status_from_exit_code() {
        assert_eq!(JobStatus::from_exit_code(Some(0)), JobStatus::Success);
        assert_eq!(JobStatus::from_exit_code(Some(21)), JobStatus::Failed);
        assert_eq!(JobStatus::from_exit_code(None), JobStatus::Failed);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&JobKind::Flash).unwrap(), "\"flash\"");
        assert_eq!(serde_json::to_string(&JobStatus::Stale).unwrap(), "\"stale\"");
    }
}
