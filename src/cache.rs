//! Download cache
//!
//! Content-addressed image storage. An entry for `(os_id, url)` is the pair
//! `<key>.bin` + `<key>.meta.json`; the binary only ever appears under its
//! canonical name by rename after a verified download (see the worker's
//! download step). `fetch` is idempotent: a valid entry is returned without
//! any network access.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use gsd_protocol::JobKind;
use gsd_worker::{CacheMeta, CacheState, DownloadStep, ImageFormat, Step};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::jobs::{JobLauncher, JobRecord, LaunchError};

/// Hex characters of the SHA-256 kept in a cache key
pub const CACHE_KEY_LEN: usize = 32;

const PARTIAL_SUFFIX: &str = ".part";

/// Errors from cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O: {0}")]
    Io(#[from] io::Error),

    #[error("could not start download job: {0}")]
    Launch(#[from] LaunchError),
}

/// Download job parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSettings {
    pub attempts: u32,
    pub timeout_secs: u64,
    pub backoff_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout_secs: 30,
            backoff_secs: 2,
        }
    }
}

/// Paths (and metadata, if present) of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub binary_path: PathBuf,
    pub meta_path: PathBuf,
    pub meta: Option<CacheMeta>,
}

impl CacheEntry {
    /// Image format recorded at download time, else guessed from `url`.
    pub fn format(&self, url: &str) -> ImageFormat {
        self.meta
            .as_ref()
            .map(|m| m.format)
            .unwrap_or_else(|| ImageFormat::from_name(url))
    }
}

/// Result of [`DownloadCache::fetch`].
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// A verified entry already existed; nothing was launched.
    Cached(CacheEntry),
    /// A download job was launched.
    Started { entry: CacheEntry, job: JobRecord },
}

impl FetchOutcome {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            FetchOutcome::Cached(entry) => entry,
            FetchOutcome::Started { entry, .. } => entry,
        }
    }
}

/// Deterministic key for `(os_id, url)`.
pub fn cache_key(os_id: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(os_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    let mut key = hex::encode(hasher.finalize());
    key.truncate(CACHE_KEY_LEN);
    key
}

#[derive(Debug, Clone)]
pub struct DownloadCache {
    dir: PathBuf,
    settings: DownloadSettings,
}

impl DownloadCache {
    pub fn new(dir: impl Into<PathBuf>, settings: DownloadSettings) -> Self {
        Self {
            dir: dir.into(),
            settings,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The entry for `(os_id, url)`, valid or not.
    pub fn entry(&self, os_id: &str, url: &str) -> CacheEntry {
        let key = cache_key(os_id, url);
        let binary_path = self.dir.join(format!("{}.bin", key));
        let meta_path = self.dir.join(format!("{}.meta.json", key));
        let meta = match CacheMeta::load(&meta_path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(key = %key, error = %e, "unreadable cache metadata");
                None
            }
        };
        CacheEntry {
            key,
            binary_path,
            meta_path,
            meta,
        }
    }

    /// The entry for `(os_id, url)` only if it is complete and verified,
    /// including against `expected_sha256` when given.
    pub fn valid_entry(
        &self,
        os_id: &str,
        url: &str,
        expected_sha256: Option<&str>,
    ) -> Option<CacheEntry> {
        let entry = self.entry(os_id, url);
        let meta = entry.meta.as_ref()?;
        if !meta.is_valid_for(&entry.binary_path) {
            return None;
        }
        if let Some(expected) = expected_sha256 {
            let actual = meta.actual_sha256.as_deref()?;
            if !actual.eq_ignore_ascii_case(expected) {
                return None;
            }
        }
        Some(entry)
    }

    /// Return the verified entry, or write a `pending` stub and launch a
    /// download job for it.
    pub fn fetch(
        &self,
        os_id: &str,
        url: &str,
        expected_sha256: Option<&str>,
        launcher: &JobLauncher,
    ) -> Result<FetchOutcome, CacheError> {
        if let Some(entry) = self.valid_entry(os_id, url, expected_sha256) {
            info!(key = %entry.key, os_id, "cache hit");
            return Ok(FetchOutcome::Cached(entry));
        }

        fs::create_dir_all(&self.dir)?;
        let mut entry = self.entry(os_id, url);
        let job_id = launcher.new_job_id(JobKind::Download);
        let format = ImageFormat::from_name(url);
        let expected = expected_sha256.map(str::to_ascii_lowercase);

        let stub = CacheMeta::pending(
            entry.key.clone(),
            os_id,
            url,
            format,
            expected.clone(),
            Some(job_id.clone()),
        );
        stub.save(&entry.meta_path)?;

        let step = DownloadStep {
            cache_key: entry.key.clone(),
            os_id: os_id.to_string(),
            url: url.to_string(),
            format,
            temp_path: self.partial_path(&entry.key, &job_id),
            final_path: entry.binary_path.clone(),
            meta_path: entry.meta_path.clone(),
            expected_sha256: expected,
            attempts: self.settings.attempts,
            timeout_secs: self.settings.timeout_secs,
            backoff_secs: self.settings.backoff_secs,
        };

        let mut meta = BTreeMap::new();
        meta.insert("os_id".to_string(), os_id.to_string());
        meta.insert("url".to_string(), url.to_string());
        meta.insert("cache_key".to_string(), entry.key.clone());
        meta.insert("binary_path".to_string(), entry.binary_path.display().to_string());

        let job = match launcher.start_with_id(job_id, JobKind::Download, vec![Step::Download(step)], meta) {
            Ok(job) => job,
            Err(e) => {
                let mut failed = stub;
                failed.state = CacheState::Failed;
                failed.error = Some(e.to_string());
                if let Err(save_err) = failed.save(&entry.meta_path) {
                    warn!(error = %save_err, "could not mark cache entry failed");
                }
                return Err(e.into());
            }
        };

        info!(key = %entry.key, os_id, job_id = %job.id, "download job started");
        entry.meta = CacheMeta::load(&entry.meta_path).ok().flatten();
        Ok(FetchOutcome::Started { entry, job })
    }

    /// Remove partial downloads older than `max_age`. Returns how many were
    /// removed.
    pub fn sweep_partials(&self, max_age: Duration) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)) {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age >= max_age && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "removed stale partial downloads");
        }
        Ok(removed)
    }

    fn partial_path(&self, key: &str, job_id: &str) -> PathBuf {
        self.dir.join(format!(".{}.{}{}", key, job_id, PARTIAL_SUFFIX))
    }
}
