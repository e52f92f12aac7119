//! Wiring of the appliance's collaborators from configuration.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::arm::{ArmGate, Clock, SystemClock};
use crate::cache::{DownloadCache, DownloadSettings};
use crate::catalog::{CatalogFile, OsCatalog};
use crate::config::Config;
use crate::flash::FlashExecutor;
use crate::jobs::{JobLauncher, JobStore, StatusResolver};
use crate::targets::{LsblkTargets, TargetProvider};

/// Errors building an [`Appliance`]
#[derive(Debug, Error)]
pub enum ApplianceError {
    #[error("cannot locate worker executable: {0}")]
    WorkerExe(#[source] std::io::Error),
}

/// Everything a request handler needs.
pub struct Appliance {
    config: Config,
    launcher: JobLauncher,
    resolver: StatusResolver,
    gate: ArmGate,
    cache: DownloadCache,
    catalog: Box<dyn OsCatalog>,
    targets: Box<dyn TargetProvider>,
}

impl Appliance {
    /// Production wiring: catalog file, `lsblk` targets, system clock.
    pub fn from_config(config: Config) -> Result<Self, ApplianceError> {
        let worker_exe = match &config.worker_exe {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(ApplianceError::WorkerExe)?,
        };
        let catalog = CatalogFile::new(config.catalog_path());
        let targets = LsblkTargets::new(config.targets.mode.map(Into::into));
        Ok(Self::assemble(
            config,
            worker_exe,
            Box::new(catalog),
            Box::new(targets),
            Arc::new(SystemClock),
        ))
    }

    /// Explicit wiring, used by tests and embedders.
    pub fn assemble(
        config: Config,
        worker_exe: PathBuf,
        catalog: Box<dyn OsCatalog>,
        targets: Box<dyn TargetProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = JobStore::new(config.jobs_dir());
        let launcher = JobLauncher::new(store.clone(), worker_exe);
        let resolver = StatusResolver::new(store);
        let gate = ArmGate::with_clock(&config.state_dir, config.write_word(), config.arm_ttl(), clock)
            .with_plan_ttl(config.plan_ttl());
        let cache = DownloadCache::new(
            config.cache_dir(),
            DownloadSettings {
                attempts: config.download.attempts,
                timeout_secs: config.download.timeout_seconds,
                backoff_secs: config.download.retry_backoff_seconds,
            },
        );
        Self {
            config,
            launcher,
            resolver,
            gate,
            cache,
            catalog,
            targets,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn launcher(&self) -> &JobLauncher {
        &self.launcher
    }

    pub fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }

    pub fn gate(&self) -> &ArmGate {
        &self.gate
    }

    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    pub fn catalog(&self) -> &dyn OsCatalog {
        self.catalog.as_ref()
    }

    pub fn targets(&self) -> &dyn TargetProvider {
        self.targets.as_ref()
    }

    pub fn flash_executor(&self) -> FlashExecutor<'_> {
        FlashExecutor {
            gate: &self.gate,
            cache: &self.cache,
            catalog: self.catalog.as_ref(),
            targets: self.targets.as_ref(),
            launcher: &self.launcher,
        }
    }
}
