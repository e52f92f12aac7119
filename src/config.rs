//! Appliance configuration
//!
//! Parses the TOML configuration at `/etc/golden-sd/config.toml` (or the
//! path given by `--config` / `GOLDEN_SD_CONFIG`). Every key is optional; a
//! missing default file means built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gsd_protocol::ops::BootMode;
use serde::{Deserialize, Serialize};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/golden-sd/config.toml";

/// Environment variable naming an alternative configuration file
pub const CONFIG_ENV: &str = "GOLDEN_SD_CONFIG";

/// Environment variable overriding `state_dir`
pub const STATE_DIR_ENV: &str = "GOLDEN_SD_STATE_DIR";

/// Environment variable overriding `arm.write_word`
pub const WRITE_WORD_ENV: &str = "GOLDEN_SD_WRITE_WORD";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of all durable state (jobs, arm slot, cache)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Download cache directory (default: `<state_dir>/cache`)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Normalized OS catalog (default: `<state_dir>/os_catalog.json`)
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Binary re-invoked as the detached worker (default: the running executable)
    #[serde(default)]
    pub worker_exe: Option<PathBuf>,

    #[serde(default)]
    pub arm: ArmConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub targets: TargetsConfig,
}

/// `[arm]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmConfig {
    /// Literal word an operator must type to arm a write
    #[serde(default = "default_write_word")]
    pub write_word: String,

    /// Lifetime of an arm token
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Lifetime of a flash plan
    #[serde(default = "default_ttl_seconds")]
    pub plan_ttl_seconds: u64,
}

/// `[download]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Attempts per download job (1..=10)
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Per-attempt network timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Linear backoff unit between attempts
    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: u64,
}

/// `[targets]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsConfig {
    /// Force the boot mode instead of detecting it from the root disk
    #[serde(default)]
    pub mode: Option<ModeOverride>,
}

/// Boot mode as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeOverride {
    Sd,
    Nvme,
}

impl From<ModeOverride> for BootMode {
    fn from(mode: ModeOverride) -> Self {
        match mode {
            ModeOverride::Sd => BootMode::Sd,
            ModeOverride::Nvme => BootMode::Nvme,
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/golden-sd")
}

fn default_write_word() -> String {
    "ERASE".to_string()
}

fn default_ttl_seconds() -> u64 {
    600
}

fn default_attempts() -> u32 {
    3
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_retry_backoff_seconds() -> u64 {
    2
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            write_word: default_write_word(),
            ttl_seconds: default_ttl_seconds(),
            plan_ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            timeout_seconds: default_timeout_seconds(),
            retry_backoff_seconds: default_retry_backoff_seconds(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            cache_dir: None,
            catalog_path: None,
            worker_exe: None,
            arm: ArmConfig::default(),
            download: DownloadConfig::default(),
            targets: TargetsConfig::default(),
        }
    }
}

/// Errors that can occur when loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Otherwise `GOLDEN_SD_CONFIG` or the
    /// default path is used, and a missing file yields defaults. Environment
    /// overrides are applied and the result validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_file(path)?,
            None => {
                let path = std::env::var_os(CONFIG_ENV)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
                if path.exists() {
                    Self::load_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a config file without overrides or validation.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults rooted at `state_dir`.
    pub fn for_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Self::default()
        }
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(word) = lookup(WRITE_WORD_ENV) {
            self.arm.write_word = word;
        }
    }

    /// Reject values the appliance cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arm.ttl_seconds == 0 {
            return Err(invalid("arm.ttl_seconds", "must be greater than zero"));
        }
        if self.arm.plan_ttl_seconds == 0 {
            return Err(invalid("arm.plan_ttl_seconds", "must be greater than zero"));
        }
        if self.arm.write_word.trim().is_empty() {
            return Err(invalid("arm.write_word", "must not be empty"));
        }
        if !(1..=10).contains(&self.download.attempts) {
            return Err(invalid("download.attempts", "must be between 1 and 10"));
        }
        if self.download.timeout_seconds == 0 {
            return Err(invalid("download.timeout_seconds", "must be greater than zero"));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(invalid("state_dir", "must not be empty"));
        }
        Ok(())
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.state_dir.join("jobs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("cache"))
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join("os_catalog.json"))
    }

    /// Write word as compared by the arm gate (trimmed, upper case).
    pub fn write_word(&self) -> String {
        self.arm.write_word.trim().to_uppercase()
    }

    pub fn arm_ttl(&self) -> Duration {
        Duration::from_secs(self.arm.ttl_seconds)
    }

    pub fn plan_ttl(&self) -> Duration {
        Duration::from_secs(self.arm.plan_ttl_seconds)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/golden-sd"));
        assert_eq!(config.arm.write_word, "ERASE");
        assert_eq!(config.arm.ttl_seconds, 600);
        assert_eq!(config.arm.plan_ttl_seconds, 600);
        assert_eq!(config.download.attempts, 3);
        assert_eq!(config.jobs_dir(), PathBuf::from("/var/lib/golden-sd/jobs"));
        assert_eq!(config.cache_dir(), PathBuf::from("/var/lib/golden-sd/cache"));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full_file() {
        let toml = r#"
state_dir = "/srv/gsd"
cache_dir = "/mnt/cache"
worker_exe = "/usr/local/bin/golden-sd"

[arm]
write_word = "WIPE"
ttl_seconds = 120
plan_ttl_seconds = 90

[download]
attempts = 5
timeout_seconds = 60
retry_backoff_seconds = 0

[targets]
mode = "nvme"
"#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.cache_dir(), PathBuf::from("/mnt/cache"));
        assert_eq!(config.catalog_path(), PathBuf::from("/srv/gsd/os_catalog.json"));
        assert_eq!(config.arm_ttl(), Duration::from_secs(120));
        assert_eq!(config.plan_ttl(), Duration::from_secs(90));
        assert_eq!(config.download.attempts, 5);
        assert_eq!(config.targets.mode, Some(ModeOverride::Nvme));
        assert_eq!(BootMode::from(ModeOverride::Nvme), BootMode::Nvme);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            STATE_DIR_ENV => Some("/tmp/gsd".to_string()),
            WRITE_WORD_ENV => Some(" flash ".to_string()),
            _ => None,
        });
        assert_eq!(config.state_dir, PathBuf::from("/tmp/gsd"));
        assert_eq!(config.write_word(), "FLASH");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.arm.ttl_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        let mut config = Config::default();
        config.arm.plan_ttl_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.download.attempts = 11;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.arm.write_word = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_mode_is_parse_error() {
        let err = Config::from_toml_str("[targets]\nmode = \"usb\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
