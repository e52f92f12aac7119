//! Cache download step.
//!
//! Bytes are streamed into a per-job partial file while being hashed. The
//! canonical binary path is only ever reached by renaming a fully downloaded
//! and verified partial, and the metadata record is flipped to `ready` after
//! that rename. A reader that trusts `ready` + matching size therefore never
//! sees a truncated image.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::artifacts::write_json_atomic;
use crate::error::{WorkerError, WorkerResult};
use crate::image::ImageFormat;
use crate::script::DownloadStep;

/// Schema version for `<key>.meta.json`.
pub const CACHE_META_SCHEMA_VERSION: u32 = 1;

const CHUNK_BYTES: usize = 1024 * 1024;
const PROGRESS_EVERY_BYTES: u64 = 64 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// A download job owns the entry.
    Pending,
    /// Binary is complete and verified.
    Ready,
    /// Last download attempt failed; see `error`.
    Failed,
}

/// Metadata stored next to each cached binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub schema_version: u32,
    pub key: String,
    pub os_id: String,
    pub url: String,
    pub format: ImageFormat,
    pub state: CacheState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CacheMeta {
    /// Provisional record written before a download job starts.
    pub fn pending(
        key: impl Into<String>,
        os_id: impl Into<String>,
        url: impl Into<String>,
        format: ImageFormat,
        expected_sha256: Option<String>,
        job_id: Option<String>,
    ) -> Self {
        Self {
            schema_version: CACHE_META_SCHEMA_VERSION,
            key: key.into(),
            os_id: os_id.into(),
            url: url.into(),
            format,
            state: CacheState::Pending,
            expected_sha256,
            actual_sha256: None,
            size_bytes: None,
            downloaded_at: None,
            job_id,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Load a metadata record. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        write_json_atomic(path, self)
    }

    /// Whether `bin` is a complete, verified copy described by this record.
    pub fn is_valid_for(&self, bin: &Path) -> bool {
        if self.state != CacheState::Ready {
            return false;
        }
        let Some(expected_size) = self.size_bytes else {
            return false;
        };
        let Ok(metadata) = fs::metadata(bin) else {
            return false;
        };
        if !metadata.is_file() || metadata.len() != expected_size {
            return false;
        }
        match (&self.expected_sha256, &self.actual_sha256) {
            (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Result of a successful download step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub bytes: u64,
    pub sha256: String,
    pub attempts: u32,
}

enum AttemptError {
    Retryable(String),
    Fatal(String),
}

/// Run one download step to completion.
pub fn run_download(step: &DownloadStep, job_id: &str) -> WorkerResult<DownloadOutcome> {
    if let Some(parent) = step.temp_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(step.timeout_secs.max(1)))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| WorkerError::DownloadRejected(format!("http client: {}", e)))?;

    let attempts = step.attempts.max(1);
    let mut last_error = String::new();
    let mut fetched = None;
    for attempt in 1..=attempts {
        info!(attempt, attempts, url = %step.url, "downloading");
        match fetch_once(&client, step) {
            Ok(result) => {
                fetched = Some((result, attempt));
                break;
            }
            Err(AttemptError::Fatal(message)) => {
                let _ = fs::remove_file(&step.temp_path);
                record_failure(step, job_id, &message);
                return Err(WorkerError::DownloadRejected(message));
            }
            Err(AttemptError::Retryable(message)) => {
                warn!(attempt, error = %message, "download attempt failed");
                last_error = message;
                let _ = fs::remove_file(&step.temp_path);
                if attempt < attempts && step.backoff_secs > 0 {
                    thread::sleep(Duration::from_secs(step.backoff_secs * u64::from(attempt)));
                }
            }
        }
    }

    let Some(((bytes, sha256), attempt)) = fetched else {
        record_failure(step, job_id, &last_error);
        return Err(WorkerError::DownloadExhausted {
            attempts,
            last_error,
        });
    };

    if let Some(expected) = &step.expected_sha256 {
        if !expected.eq_ignore_ascii_case(&sha256) {
            let _ = fs::remove_file(&step.temp_path);
            let err = WorkerError::ChecksumMismatch {
                expected: expected.clone(),
                actual: sha256,
            };
            record_failure(step, job_id, &err.to_string());
            return Err(err);
        }
    }

    fs::rename(&step.temp_path, &step.final_path)?;

    let mut meta = current_meta(step, job_id);
    meta.state = CacheState::Ready;
    meta.actual_sha256 = Some(sha256.clone());
    meta.size_bytes = Some(bytes);
    meta.downloaded_at = Some(Utc::now());
    meta.job_id = Some(job_id.to_string());
    meta.error = None;
    meta.updated_at = Utc::now();
    meta.save(&step.meta_path)?;

    info!(bytes, sha256 = %sha256, "download verified and cached");
    Ok(DownloadOutcome {
        bytes,
        sha256,
        attempts: attempt,
    })
}

fn fetch_once(
    client: &reqwest::blocking::Client,
    step: &DownloadStep,
) -> Result<(u64, String), AttemptError> {
    let mut response = client
        .get(&step.url)
        .send()
        .map_err(|e| AttemptError::Retryable(e.to_string()))?;
    let status = response.status();
    if status.is_client_error() {
        return Err(AttemptError::Fatal(format!("server returned {}", status)));
    }
    if !status.is_success() {
        return Err(AttemptError::Retryable(format!("server returned {}", status)));
    }

    let mut file = File::create(&step.temp_path).map_err(|e| {
        AttemptError::Fatal(format!("cannot create {}: {}", step.temp_path.display(), e))
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut total = 0u64;
    let mut next_report = PROGRESS_EVERY_BYTES;
    loop {
        let n = match response.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(AttemptError::Retryable(e.to_string())),
        };
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])
            .map_err(|e| AttemptError::Fatal(format!("write to cache failed: {}", e)))?;
        total += n as u64;
        if total >= next_report {
            info!(bytes = total, "download progress");
            next_report += PROGRESS_EVERY_BYTES;
        }
    }
    file.sync_all()
        .map_err(|e| AttemptError::Fatal(format!("sync of cache file failed: {}", e)))?;
    Ok((total, hex::encode(hasher.finalize())))
}

fn current_meta(step: &DownloadStep, job_id: &str) -> CacheMeta {
    match CacheMeta::load(&step.meta_path) {
        Ok(Some(meta)) => meta,
        _ => CacheMeta::pending(
            step.cache_key.clone(),
            step.os_id.clone(),
            step.url.clone(),
            step.format,
            step.expected_sha256.clone(),
            Some(job_id.to_string()),
        ),
    }
}

/// Mark the entry failed and drop any binary left by an earlier download,
/// so a failed refresh never leaves a canonical file behind.
fn record_failure(step: &DownloadStep, job_id: &str, message: &str) {
    match fs::remove_file(&step.final_path) {
        Ok(()) => info!(path = %step.final_path.display(), "removed stale cached binary"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, "could not remove stale cached binary"),
    }
    let mut meta = current_meta(step, job_id);
    meta.state = CacheState::Failed;
    meta.error = Some(message.to_string());
    meta.job_id = Some(job_id.to_string());
    meta.updated_at = Utc::now();
    if let Err(e) = meta.save(&step.meta_path) {
        warn!(error = %e, "could not record download failure in cache metadata");
    }
}
