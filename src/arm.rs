//! Safety arming gate
//!
//! A single persisted slot (`arm_state.json`) holding at most one pending
//! authorization for a destructive write. Arming requires the target typed
//! twice, the configured write word, a live flash plan for the same target
//! and OS, and an eligible target. The resulting token is time limited and
//! single use.
//!
//! Plans live in a second slot (`plan_state.json`). A new plan replaces the
//! previous one and a successful arm uses it up.
//!
//! Every transition runs under [`StateLock`], which makes `consume`'s
//! read-check-delete atomic across concurrent request handlers: of two
//! racing flash requests exactly one sees the arm.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gsd_protocol::ops::DiskReport;
use gsd_worker::write_json_atomic;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::lock::{LockError, StateLock};
use crate::targets::TargetSnapshot;

/// Arm slot file name inside the state directory
pub const ARM_STATE_FILE: &str = "arm_state.json";

/// Plan slot file name inside the state directory
pub const PLAN_STATE_FILE: &str = "plan_state.json";

/// Lock file guarding both slots
pub const ARM_LOCK_FILE: &str = "arm_state.lock";

const TOKEN_BYTES: usize = 32;
const PLAN_ID_BYTES: usize = 12;
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Wall-clock source, injectable for expiry tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = match self.now.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now += step;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// The persisted arm slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmState {
    pub token: String,
    pub target: String,
    pub os_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ArmState {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The persisted plan slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanState {
    pub plan_id: String,
    pub target: String,
    pub os_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PlanState {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Rejections and failures of arm transitions
#[derive(Debug, Error)]
pub enum ArmError {
    #[error("confirm_target mismatch")]
    ConfirmMismatch,

    #[error("wrong confirmation word")]
    WrongWord,

    #[error("target not eligible")]
    TargetNotEligible(String),

    #[error("serial suffix mismatch")]
    SerialMismatch,

    #[error("not armed")]
    NotArmed,

    #[error("expired")]
    Expired,

    #[error("target mismatch")]
    TargetMismatch,

    #[error("os mismatch")]
    OsMismatch,

    #[error("invalid token")]
    InvalidToken,

    #[error("plan not found")]
    PlanNotFound,

    #[error("plan expired")]
    PlanExpired,

    #[error("plan does not match target and os")]
    PlanMismatch,

    #[error("arm state lock: {0}")]
    Lock(#[from] LockError),

    #[error("arm state I/O: {0}")]
    Io(#[from] io::Error),
}

/// Arguments of [`ArmGate::arm`].
#[derive(Debug, Clone, Copy)]
pub struct ArmParams<'a> {
    pub plan_id: &'a str,
    pub target: &'a str,
    pub os_id: &'a str,
    pub confirm_target: &'a str,
    /// Already trimmed and upper-cased by the caller.
    pub word: &'a str,
    pub serial_suffix: Option<&'a str>,
}

/// Whether `disk`'s serial ends with `suffix` (ignoring case). A blank or
/// absent suffix always matches.
pub fn serial_matches(disk: &DiskReport, suffix: Option<&str>) -> bool {
    let Some(suffix) = suffix.map(str::trim).filter(|s| !s.is_empty()) else {
        return true;
    };
    disk.serial
        .as_deref()
        .map(|serial| {
            serial
                .trim()
                .to_ascii_lowercase()
                .ends_with(&suffix.to_ascii_lowercase())
        })
        .unwrap_or(false)
}

/// The single-slot arm state machine.
#[derive(Clone)]
pub struct ArmGate {
    state_path: PathBuf,
    plan_path: PathBuf,
    lock_path: PathBuf,
    write_word: String,
    ttl: Duration,
    plan_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ArmGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmGate")
            .field("state_path", &self.state_path)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ArmGate {
    pub fn new(state_dir: &Path, write_word: impl Into<String>, ttl: Duration) -> Self {
        Self::with_clock(state_dir, write_word, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(
        state_dir: &Path,
        write_word: impl Into<String>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state_path: state_dir.join(ARM_STATE_FILE),
            plan_path: state_dir.join(PLAN_STATE_FILE),
            lock_path: state_dir.join(ARM_LOCK_FILE),
            write_word: write_word.into(),
            ttl,
            plan_ttl: ttl,
            clock,
        }
    }

    /// Lifetime of a plan; defaults to the arm TTL.
    pub fn with_plan_ttl(mut self, plan_ttl: Duration) -> Self {
        self.plan_ttl = plan_ttl;
        self
    }

    pub fn write_word(&self) -> &str {
        &self.write_word
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn plan_ttl(&self) -> Duration {
        self.plan_ttl
    }

    /// Record a plan for `target` and `os_id`, replacing any prior plan.
    /// Eligibility and catalog checks are the caller's.
    pub fn plan(&self, target: &str, os_id: &str) -> Result<PlanState, ArmError> {
        let now = self.clock.now();
        let plan = PlanState {
            plan_id: format!("pl-{}", random_hex(PLAN_ID_BYTES)),
            target: target.to_string(),
            os_id: os_id.to_string(),
            created_at: now,
            expires_at: now + to_chrono(self.plan_ttl),
        };

        let _lock = self.lock()?;
        write_json_atomic(&self.plan_path, &plan)?;
        info!(plan_id = %plan.plan_id, device = %plan.target, os_id = %plan.os_id, "flash planned");
        Ok(plan)
    }

    /// The checks that depend only on what the operator typed.
    pub fn check_inputs(&self, params: &ArmParams<'_>) -> Result<(), ArmError> {
        if params.confirm_target != params.target {
            return Err(ArmError::ConfirmMismatch);
        }
        if params.word != self.write_word {
            return Err(ArmError::WrongWord);
        }
        Ok(())
    }

    /// Arm `params.target` for `params.os_id`, replacing any prior arm.
    ///
    /// Checks run in order: confirmation, word, plan, eligibility, serial.
    /// An expired plan is cleared; on success the plan is used up.
    pub fn arm(&self, params: &ArmParams<'_>, targets: &TargetSnapshot) -> Result<ArmState, ArmError> {
        self.check_inputs(params)?;

        let _lock = self.lock()?;
        let now = self.clock.now();
        let plan = read_slot::<PlanState>(&self.plan_path)?
            .ok_or(ArmError::PlanNotFound)?;
        if plan.is_expired_at(now) {
            clear(&self.plan_path)?;
            return Err(ArmError::PlanExpired);
        }
        if !constant_time_eq(plan.plan_id.as_bytes(), params.plan_id.as_bytes()) {
            return Err(ArmError::PlanNotFound);
        }
        if plan.target != params.target || plan.os_id != params.os_id {
            return Err(ArmError::PlanMismatch);
        }

        let disk = targets
            .eligible(params.target)
            .ok_or_else(|| ArmError::TargetNotEligible(params.target.to_string()))?;
        if !serial_matches(disk, params.serial_suffix) {
            return Err(ArmError::SerialMismatch);
        }

        let state = ArmState {
            token: random_hex(TOKEN_BYTES),
            target: params.target.to_string(),
            os_id: params.os_id.to_string(),
            issued_at: now,
            expires_at: now + to_chrono(self.ttl),
        };
        write_json_atomic(&self.state_path, &state)?;
        clear(&self.plan_path)?;
        info!(device = %state.target, os_id = %state.os_id, expires_at = %state.expires_at, "armed");
        Ok(state)
    }

    /// Validate and consume the arm. On success the slot is already gone
    /// when this returns.
    ///
    /// Checks run in order: armed, not expired, target, os, token. Only
    /// expiry clears the slot on failure.
    pub fn consume(&self, token: &str, target: &str, os_id: &str) -> Result<ArmState, ArmError> {
        let _lock = self.lock()?;
        let state = read_slot::<ArmState>(&self.state_path)?
            .ok_or(ArmError::NotArmed)?;

        if state.is_expired_at(self.clock.now()) {
            clear(&self.state_path)?;
            return Err(ArmError::Expired);
        }
        if state.target != target {
            return Err(ArmError::TargetMismatch);
        }
        if state.os_id != os_id {
            return Err(ArmError::OsMismatch);
        }
        if !constant_time_eq(state.token.as_bytes(), token.as_bytes()) {
            return Err(ArmError::InvalidToken);
        }

        clear(&self.state_path)?;
        info!(device = %state.target, os_id = %state.os_id, "arm consumed");
        Ok(state)
    }

    /// Clear any arm. Idempotent.
    pub fn disarm(&self) -> Result<(), ArmError> {
        let _lock = self.lock()?;
        if clear(&self.state_path)? {
            info!("disarmed");
        }
        Ok(())
    }

    /// The live arm, if any. An expired arm is cleared and reported absent.
    pub fn status(&self) -> Result<Option<ArmState>, ArmError> {
        let _lock = self.lock()?;
        match read_slot::<ArmState>(&self.state_path)? {
            Some(state) if state.is_expired_at(self.clock.now()) => {
                clear(&self.state_path)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn lock(&self) -> Result<StateLock, ArmError> {
        Ok(StateLock::acquire(&self.lock_path, LOCK_TIMEOUT)?)
    }
}

fn read_slot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ArmError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&raw) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            // An unreadable slot authorizes nothing.
            warn!(path = %path.display(), error = %e, "discarding corrupt gate state");
            clear(path)?;
            Ok(None)
        }
    }
}

fn clear(path: &Path) -> Result<bool, ArmError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::{StaticTargets, TargetProvider};
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(600);

    fn setup() -> (TempDir, Arc<ManualClock>, ArmGate, TargetSnapshot) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = ArmGate::with_clock(dir.path(), "ERASE", TTL, clock.clone())
            .with_plan_ttl(Duration::from_secs(300));
        let targets = StaticTargets::allowing(["/dev/sdb", "/dev/sdc"])
            .with_serial("/dev/sdb", "SN-00AB12")
            .snapshot()
            .unwrap();
        (dir, clock, gate, targets)
    }

    fn params<'a>(plan_id: &'a str, target: &'a str, os_id: &'a str) -> ArmParams<'a> {
        ArmParams {
            plan_id,
            target,
            os_id,
            confirm_target: target,
            word: "ERASE",
            serial_suffix: None,
        }
    }

    fn plan_and_arm(gate: &ArmGate, targets: &TargetSnapshot, target: &str, os_id: &str) -> ArmState {
        let plan = gate.plan(target, os_id).unwrap();
        gate.arm(&params(&plan.plan_id, target, os_id), targets).unwrap()
    }

    #[test]
    fn test_arm_issues_token_with_ttl() {
        let (_dir, clock, gate, targets) = setup();

        let state = plan_and_arm(&gate, &targets, "/dev/sdb", "x");

        assert_eq!(state.token.len(), TOKEN_BYTES * 2);
        assert_eq!(state.issued_at, clock.now());
        assert_eq!(state.expires_at - state.issued_at, chrono::Duration::seconds(600));
        assert_eq!(gate.status().unwrap(), Some(state));
    }

    #[test]
    fn test_arm_rejections() {
        let (_dir, _clock, gate, targets) = setup();
        let plan = gate.plan("/dev/sdb", "x").unwrap();
        let id = plan.plan_id.as_str();

        let mut p = params(id, "/dev/sdb", "x");
        p.confirm_target = "/dev/sdc";
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::ConfirmMismatch)));

        let mut p = params(id, "/dev/sdb", "x");
        p.word = "ERASE NOW";
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::WrongWord)));

        let mut p = params(id, "/dev/sdb", "x");
        p.serial_suffix = Some("FFFF");
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::SerialMismatch)));

        let plan = gate.plan("/dev/mmcblk0", "x").unwrap();
        let p = params(&plan.plan_id, "/dev/mmcblk0", "x");
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::TargetNotEligible(_))));

        assert_eq!(gate.status().unwrap(), None);
    }

    #[test]
    fn test_input_checks_need_no_targets() {
        let (_dir, _clock, gate, _targets) = setup();

        let mut p = params("pl-none", "/dev/sdb", "x");
        p.confirm_target = "/dev/sdc";
        assert!(matches!(gate.check_inputs(&p), Err(ArmError::ConfirmMismatch)));

        let mut p = params("pl-none", "/dev/sdb", "x");
        p.word = "erase";
        assert!(matches!(gate.check_inputs(&p), Err(ArmError::WrongWord)));

        assert!(gate.check_inputs(&params("pl-none", "/dev/sdb", "x")).is_ok());
    }

    #[test]
    fn test_arm_requires_live_matching_plan() {
        let (dir, clock, gate, targets) = setup();

        let p = params("pl-none", "/dev/sdb", "x");
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::PlanNotFound)));

        let plan = gate.plan("/dev/sdb", "x").unwrap();
        assert_eq!(plan.expires_at - plan.created_at, chrono::Duration::seconds(300));
        let p = params("pl-000000000000000000000000", "/dev/sdb", "x");
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::PlanNotFound)));

        let p = params(&plan.plan_id, "/dev/sdc", "x");
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::PlanMismatch)));
        let p = params(&plan.plan_id, "/dev/sdb", "y");
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::PlanMismatch)));

        clock.advance(Duration::from_secs(300));
        let p = params(&plan.plan_id, "/dev/sdb", "x");
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::PlanExpired)));
        assert!(!dir.path().join(PLAN_STATE_FILE).exists());
    }

    #[test]
    fn test_plan_is_used_up_by_arm() {
        let (dir, _clock, gate, targets) = setup();
        let plan = gate.plan("/dev/sdb", "x").unwrap();
        let p = params(&plan.plan_id, "/dev/sdb", "x");

        gate.arm(&p, &targets).unwrap();

        assert!(!dir.path().join(PLAN_STATE_FILE).exists());
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::PlanNotFound)));
    }

    #[test]
    fn test_new_plan_replaces_previous() {
        let (_dir, _clock, gate, targets) = setup();
        let first = gate.plan("/dev/sdb", "x").unwrap();
        let second = gate.plan("/dev/sdc", "y").unwrap();
        assert_ne!(first.plan_id, second.plan_id);
        assert!(first.plan_id.starts_with("pl-"));

        let p = params(&first.plan_id, "/dev/sdb", "x");
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::PlanNotFound)));
        assert!(gate.arm(&params(&second.plan_id, "/dev/sdc", "y"), &targets).is_ok());
    }

    #[test]
    fn test_serial_suffix_case_insensitive() {
        let (_dir, _clock, gate, targets) = setup();
        let plan = gate.plan("/dev/sdb", "x").unwrap();
        let mut p = params(&plan.plan_id, "/dev/sdb", "x");
        p.serial_suffix = Some("ab12");

        assert!(gate.arm(&p, &targets).is_ok());
    }

    #[test]
    fn test_rearm_replaces_previous() {
        let (_dir, _clock, gate, targets) = setup();
        let first = plan_and_arm(&gate, &targets, "/dev/sdb", "x");
        let second = plan_and_arm(&gate, &targets, "/dev/sdc", "y");

        assert!(matches!(
            gate.consume(&first.token, "/dev/sdb", "x"),
            Err(ArmError::TargetMismatch)
        ));
        assert!(gate.consume(&second.token, "/dev/sdc", "y").is_ok());
    }

    #[test]
    fn test_consume_is_single_use() {
        let (_dir, _clock, gate, targets) = setup();
        let state = plan_and_arm(&gate, &targets, "/dev/sdb", "x");

        assert!(gate.consume(&state.token, "/dev/sdb", "x").is_ok());
        assert!(matches!(
            gate.consume(&state.token, "/dev/sdb", "x"),
            Err(ArmError::NotArmed)
        ));
    }

    #[test]
    fn test_wrong_token_keeps_arm() {
        let (_dir, _clock, gate, targets) = setup();
        let state = plan_and_arm(&gate, &targets, "/dev/sdb", "x");

        assert!(matches!(gate.consume("wrong", "/dev/sdb", "x"), Err(ArmError::InvalidToken)));
        assert!(matches!(gate.consume(&state.token, "/dev/sdb", "other"), Err(ArmError::OsMismatch)));
        assert!(gate.status().unwrap().is_some());
        assert!(gate.consume(&state.token, "/dev/sdb", "x").is_ok());
    }

    #[test]
    fn test_expired_arm_is_cleared() {
        let (_dir, clock, gate, targets) = setup();
        let state = plan_and_arm(&gate, &targets, "/dev/sdb", "x");

        clock.advance(TTL);

        assert!(matches!(gate.consume(&state.token, "/dev/sdb", "x"), Err(ArmError::Expired)));
        assert_eq!(gate.status().unwrap(), None);
        assert!(matches!(gate.consume(&state.token, "/dev/sdb", "x"), Err(ArmError::NotArmed)));
    }

    #[test]
    fn test_status_clears_expired_arm() {
        let (dir, clock, gate, targets) = setup();
        plan_and_arm(&gate, &targets, "/dev/sdb", "x");

        clock.advance(Duration::from_secs(601));

        assert_eq!(gate.status().unwrap(), None);
        assert!(!dir.path().join(ARM_STATE_FILE).exists());
    }

    #[test]
    fn test_disarm_idempotent() {
        let (_dir, _clock, gate, targets) = setup();
        plan_and_arm(&gate, &targets, "/dev/sdb", "x");

        gate.disarm().unwrap();
        gate.disarm().unwrap();
        assert_eq!(gate.status().unwrap(), None);
    }

    #[test]
    fn test_corrupt_slot_is_not_armed() {
        let (dir, _clock, gate, targets) = setup();
        fs::write(dir.path().join(ARM_STATE_FILE), "{garbage").unwrap();
        fs::write(dir.path().join(PLAN_STATE_FILE), "{garbage").unwrap();

        assert!(matches!(gate.consume("t", "/dev/sdb", "x"), Err(ArmError::NotArmed)));
        let p = params("pl-x", "/dev/sdb", "x");
        assert!(matches!(gate.arm(&p, &targets), Err(ArmError::PlanNotFound)));
    }

    #[test]
    fn test_concurrent_consume_single_winner() {
        let (_dir, _clock, gate, targets) = setup();
        let state = plan_and_arm(&gate, &targets, "/dev/sdb", "x");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let token = state.token.clone();
                std::thread::spawn(move || gate.consume(&token, "/dev/sdb", "x").is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
    }
}
