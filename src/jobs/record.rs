//! Durable job record (`<job_id>.json`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use gsd_protocol::{JobKind, JobStatus};
use gsd_worker::JobPaths;
use serde::{Deserialize, Serialize};

/// Schema version for job records
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Worker artifact locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub script: PathBuf,
    pub log: PathBuf,
    pub rc: PathBuf,
}

impl From<&JobPaths> for JobArtifacts {
    fn from(paths: &JobPaths) -> Self {
        Self {
            script: paths.script.clone(),
            log: paths.log.clone(),
            rc: paths.rc.clone(),
        }
    }
}

/// One job, as written by the launcher.
///
/// `status` is the status at launch. The authoritative current status is
/// always derived by the resolver and never written back here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Schema version
    pub schema_version: u32,

    /// Job identifier
    pub id: String,

    /// Kind of work
    #[serde(rename = "type")]
    pub kind: JobKind,

    /// Status at launch
    pub status: JobStatus,

    /// Worker process id at launch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the record was last written
    pub updated_at: DateTime<Utc>,

    /// Worker artifacts
    pub artifacts: JobArtifacts,

    /// Display context (os id, url, target); never used for decisions
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl JobRecord {
    /// Record for a freshly launched worker.
    pub fn launched(
        id: impl Into<String>,
        kind: JobKind,
        pid: u32,
        paths: &JobPaths,
        meta: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            id: id.into(),
            kind,
            status: JobStatus::Running,
            pid: Some(pid),
            created_at: now,
            updated_at: now,
            artifacts: JobArtifacts::from(paths),
            meta,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_record_wire_shape() {
        let paths = JobPaths::new(Path::new("/state/jobs"), "dl-abc");
        let mut meta = BTreeMap::new();
        meta.insert("os_id".to_string(), "rpi-os".to_string());
        let record = JobRecord::launched("dl-abc", JobKind::Download, 4242, &paths, meta);

        let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "download");
        assert_eq!(json["status"], "running");
        assert_eq!(json["pid"], 4242);
        assert_eq!(json["artifacts"]["rc"], "/state/jobs/dl-abc.rc");
        assert_eq!(json["meta"]["os_id"], "rpi-os");

        let back = JobRecord::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(back, record);
    }
}
