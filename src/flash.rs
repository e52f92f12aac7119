//! Flash executor
//!
//! Turns a consumed arm plus a verified cache entry into a write job. All
//! preconditions are checked synchronously; nothing destructive happens in
//! this process. The job script is a fixed sequence of typed steps:
//! unmount each mounted partition, write the image, sync, re-read the
//! partition table.

use std::collections::BTreeMap;
use std::path::PathBuf;

use gsd_protocol::ops::DiskReport;
use gsd_protocol::JobKind;
use gsd_worker::{ImageFormat, Step, WriteImageStep};
use thiserror::Error;
use tracing::info;

use crate::arm::{serial_matches, ArmError, ArmGate};
use crate::cache::{CacheEntry, DownloadCache};
use crate::catalog::{CatalogError, OsCatalog};
use crate::jobs::{JobLauncher, JobRecord, LaunchError};
use crate::targets::{TargetError, TargetProvider};

/// Errors from [`FlashExecutor::flash`]
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("target not eligible")]
    TargetNotEligible(String),

    #[error("confirm_target mismatch")]
    ConfirmMismatch,

    #[error("serial suffix mismatch")]
    SerialMismatch,

    #[error(transparent)]
    Arm(#[from] ArmError),

    #[error("os '{0}' not found in catalog")]
    UnknownOs(String),

    #[error("image not in cache; run start_download first")]
    CacheMissing { os_id: String, cache_key: String },

    #[error("target discovery failed: {0}")]
    Targets(#[from] TargetError),

    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Arguments of [`FlashExecutor::flash`].
#[derive(Debug, Clone, Copy)]
pub struct FlashParams<'a> {
    pub target: &'a str,
    pub os_id: &'a str,
    pub token: &'a str,
    pub confirm_target: &'a str,
    pub serial_suffix: Option<&'a str>,
}

/// Borrowing view over the collaborators a flash needs.
pub struct FlashExecutor<'a> {
    pub gate: &'a ArmGate,
    pub cache: &'a DownloadCache,
    pub catalog: &'a dyn OsCatalog,
    pub targets: &'a dyn TargetProvider,
    pub launcher: &'a JobLauncher,
}

impl FlashExecutor<'_> {
    /// Validate, consume the arm and launch the write job.
    ///
    /// The arm is consumed before the cache is consulted, so a flash that
    /// fails with `CacheMissing` still uses up its token.
    pub fn flash(&self, params: &FlashParams<'_>) -> Result<JobRecord, FlashError> {
        let snapshot = self.targets.snapshot()?;
        let disk = snapshot
            .eligible(params.target)
            .ok_or_else(|| FlashError::TargetNotEligible(params.target.to_string()))?;
        if params.confirm_target != params.target {
            return Err(FlashError::ConfirmMismatch);
        }
        if !serial_matches(disk, params.serial_suffix) {
            return Err(FlashError::SerialMismatch);
        }

        self.gate.consume(params.token, params.target, params.os_id)?;

        let item = self
            .catalog
            .lookup(params.os_id)?
            .ok_or_else(|| FlashError::UnknownOs(params.os_id.to_string()))?;
        let expected = item.expected_sha256();
        let entry = self
            .cache
            .valid_entry(params.os_id, &item.url, expected.as_deref())
            .ok_or_else(|| FlashError::CacheMissing {
                os_id: params.os_id.to_string(),
                cache_key: self.cache.entry(params.os_id, &item.url).key,
            })?;

        let format = entry.format(&item.url);
        let steps = write_steps(disk, &entry, format);

        let mut meta = BTreeMap::new();
        meta.insert("os_id".to_string(), params.os_id.to_string());
        meta.insert("url".to_string(), item.url.clone());
        meta.insert("target".to_string(), params.target.to_string());
        meta.insert("cache_key".to_string(), entry.key.clone());
        meta.insert("format".to_string(), format.to_string());

        let job = self.launcher.start(JobKind::Flash, steps, meta)?;
        info!(job_id = %job.id, device = %params.target, os_id = %params.os_id, "flash job started");
        Ok(job)
    }
}

/// Steps of a write job for `disk`.
pub fn write_steps(disk: &DiskReport, entry: &CacheEntry, format: ImageFormat) -> Vec<Step> {
    let mut steps: Vec<Step> = disk
        .mounted_partitions
        .iter()
        .map(|part| Step::exec_tolerant(["umount", part.as_str()]))
        .collect();
    steps.push(Step::WriteImage(WriteImageStep {
        source: entry.binary_path.clone(),
        format,
        target: PathBuf::from(&disk.path),
    }));
    steps.push(Step::exec(["sync"]));
    steps.push(Step::exec_tolerant(["blockdev", "--rereadpt", disk.path.as_str()]));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::StaticTargets;

    #[test]
    fn test_write_steps_order() {
        let targets = StaticTargets::allowing(["/dev/sdb"]).with_mounted("/dev/sdb", &["/dev/sdb1", "/dev/sdb2"]);
        let snapshot = targets.snapshot().unwrap();
        let disk = snapshot.eligible("/dev/sdb").unwrap();
        let entry = CacheEntry {
            key: "k".into(),
            binary_path: PathBuf::from("/cache/k.bin"),
            meta_path: PathBuf::from("/cache/k.meta.json"),
            meta: None,
        };

        let steps = write_steps(disk, &entry, ImageFormat::Xz);

        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0], Step::exec_tolerant(["umount", "/dev/sdb1"]));
        assert_eq!(steps[1], Step::exec_tolerant(["umount", "/dev/sdb2"]));
        match &steps[2] {
            Step::WriteImage(w) => {
                assert_eq!(w.target, PathBuf::from("/dev/sdb"));
                assert_eq!(w.format, ImageFormat::Xz);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(steps[3], Step::exec(["sync"]));
        assert_eq!(steps[4], Step::exec_tolerant(["blockdev", "--rereadpt", "/dev/sdb"]));
    }
}
