//! Eligible write targets
//!
//! Lists block devices and decides which of them may be written, from the
//! boot mode and the device's transport:
//! - booted from SD: only NVMe disks
//! - booted from NVMe: only SD (`mmcblk*`) or USB disks
//! - boot mode unknown: nothing
//!
//! The root disk, RAM/zram/loop devices and read-only disks are never
//! eligible. Every shell-out uses an explicit argument list.

use std::process::Command;

use gsd_protocol::ops::{BootMode, DiskReport, TargetsResponse};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors from target discovery
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unparsable lsblk output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Point-in-time view of the machine's disks.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSnapshot {
    pub mode: BootMode,
    pub root_source: String,
    pub root_parent: String,
    pub disks: Vec<DiskReport>,
}

impl TargetSnapshot {
    /// The disk at `path`, only if it is currently allowed.
    pub fn eligible(&self, path: &str) -> Option<&DiskReport> {
        self.disks.iter().find(|d| d.allowed && d.path == path)
    }

    pub fn into_response(self) -> TargetsResponse {
        TargetsResponse {
            mode: self.mode,
            root_source: self.root_source,
            root_parent: self.root_parent,
            disks: self.disks,
        }
    }
}

/// Source of the eligible-target set.
pub trait TargetProvider: Send + Sync {
    fn snapshot(&self) -> Result<TargetSnapshot, TargetError>;
}

/// Fixed snapshot, for tests and rigs without `lsblk`.
#[derive(Debug, Clone)]
pub struct StaticTargets {
    snapshot: TargetSnapshot,
}

impl StaticTargets {
    pub fn new(snapshot: TargetSnapshot) -> Self {
        Self { snapshot }
    }

    /// Snapshot in which exactly `paths` are allowed.
    pub fn allowing<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let disks = paths
            .into_iter()
            .map(|path| {
                let path = path.into();
                let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                DiskReport {
                    name,
                    path,
                    size: None,
                    model: None,
                    serial: None,
                    tran: None,
                    mounted_partitions: Vec::new(),
                    mountpoints: Vec::new(),
                    is_root_parent: false,
                    allowed: true,
                    why_not: Vec::new(),
                }
            })
            .collect();
        Self::new(TargetSnapshot {
            mode: BootMode::Sd,
            root_source: String::new(),
            root_parent: String::new(),
            disks,
        })
    }

    /// Set the serial of the disk at `path`.
    pub fn with_serial(mut self, path: &str, serial: &str) -> Self {
        for disk in self.snapshot.disks.iter_mut().filter(|d| d.path == path) {
            disk.serial = Some(serial.to_string());
        }
        self
    }

    /// Record mounted partitions for the disk at `path`.
    pub fn with_mounted(mut self, path: &str, partitions: &[&str]) -> Self {
        for disk in self.snapshot.disks.iter_mut().filter(|d| d.path == path) {
            disk.mounted_partitions = partitions.iter().map(|p| p.to_string()).collect();
        }
        self
    }
}

impl TargetProvider for StaticTargets {
    fn snapshot(&self) -> Result<TargetSnapshot, TargetError> {
        Ok(self.snapshot.clone())
    }
}

/// Live provider backed by `findmnt` and `lsblk`.
#[derive(Debug, Clone, Default)]
pub struct LsblkTargets {
    mode_override: Option<BootMode>,
}

const LSBLK_COLUMNS: &str = "NAME,PATH,SIZE,MODEL,SERIAL,TRAN,RM,RO,TYPE,MOUNTPOINTS,FSTYPE,PKNAME";

impl LsblkTargets {
    pub fn new(mode_override: Option<BootMode>) -> Self {
        Self { mode_override }
    }

    fn root_parent(root_source: &str) -> String {
        if root_source.is_empty() {
            return String::new();
        }
        match run(&["lsblk", "-no", "PKNAME", root_source]) {
            Ok(out) if !out.trim().is_empty() => out.trim().to_string(),
            _ => parent_from_partition(root_source),
        }
    }
}

impl TargetProvider for LsblkTargets {
    fn snapshot(&self) -> Result<TargetSnapshot, TargetError> {
        let root_source = run(&["findmnt", "-no", "SOURCE", "/"])
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let root_parent = Self::root_parent(&root_source);
        let mode = self
            .mode_override
            .unwrap_or_else(|| detect_mode(&root_parent));

        let raw = run(&["lsblk", "-J", "-e7", "-o", LSBLK_COLUMNS])?;
        let devices = parse_lsblk(&raw)?;
        let disks = classify(mode, &root_parent, &devices);
        debug!(?mode, root_parent = %root_parent, disks = disks.len(), "target snapshot");

        Ok(TargetSnapshot {
            mode,
            root_source,
            root_parent,
            disks,
        })
    }
}

/// One node of `lsblk -J` output.
#[derive(Debug, Clone, Deserialize)]
pub struct LsblkDevice {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub size: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub tran: Option<String>,
    #[serde(default)]
    pub ro: Option<Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub mountpoints: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    fn dev_path(&self) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("/dev/{}", self.name))
    }

    fn own_mountpoints(&self) -> Vec<String> {
        let mut points: Vec<String> = self
            .mountpoints
            .iter()
            .flatten()
            .flatten()
            .filter(|m| !m.is_empty())
            .cloned()
            .collect();
        if let Some(mp) = self.mountpoint.as_ref().filter(|m| !m.is_empty()) {
            if !points.contains(mp) {
                points.push(mp.clone());
            }
        }
        points
    }

    fn is_read_only(&self) -> bool {
        match &self.ro {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_u64() == Some(1),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

/// Parse `lsblk -J` output.
pub fn parse_lsblk(raw: &str) -> Result<Vec<LsblkDevice>, TargetError> {
    Ok(serde_json::from_str::<LsblkOutput>(raw)?.blockdevices)
}

/// Boot mode implied by the root disk's name.
pub fn detect_mode(root_parent: &str) -> BootMode {
    if root_parent.starts_with("mmcblk") {
        BootMode::Sd
    } else if root_parent.starts_with("nvme") {
        BootMode::Nvme
    } else {
        BootMode::Unknown
    }
}

/// Disk name for a partition device when `lsblk` cannot say
/// (`/dev/mmcblk0p2` -> `mmcblk0`, `/dev/sda1` -> `sda`).
pub fn parent_from_partition(device: &str) -> String {
    let name = device.trim_start_matches("/dev/");
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        if let Some(idx) = name.rfind('p') {
            let (head, tail) = name.split_at(idx);
            if tail.len() > 1 && tail[1..].chars().all(|c| c.is_ascii_digit()) {
                return head.to_string();
            }
        }
        return name.to_string();
    }
    name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

/// Apply the write policy to every top-level disk.
pub fn classify(mode: BootMode, root_parent: &str, devices: &[LsblkDevice]) -> Vec<DiskReport> {
    devices
        .iter()
        .filter(|d| d.kind.as_deref() == Some("disk"))
        .filter(|d| !["ram", "zram", "loop"].iter().any(|p| d.name.starts_with(p)))
        .map(|d| classify_disk(mode, root_parent, d))
        .collect()
}

fn classify_disk(mode: BootMode, root_parent: &str, disk: &LsblkDevice) -> DiskReport {
    let tran = disk.tran.as_deref().unwrap_or("").to_ascii_lowercase();
    let is_root_parent = !root_parent.is_empty() && disk.name == root_parent;

    let mut mountpoints = disk.own_mountpoints();
    let mut mounted_partitions = Vec::new();
    if !mountpoints.is_empty() {
        mounted_partitions.push(disk.dev_path());
    }
    collect_mounted_children(&disk.children, &mut mounted_partitions, &mut mountpoints);

    let mut why_not = Vec::new();
    if is_root_parent {
        why_not.push("is_root_parent".to_string());
    }
    if disk.is_read_only() {
        why_not.push("read_only".to_string());
    }
    match mode {
        BootMode::Sd => {
            if !(disk.name.starts_with("nvme") || tran == "nvme") {
                why_not.push("mode_SD_allows_only_nvme_targets".to_string());
            }
        }
        BootMode::Nvme => {
            if !(disk.name.starts_with("mmcblk") || tran == "usb") {
                why_not.push("mode_NVME_allows_only_sd_or_usb_targets".to_string());
            }
        }
        BootMode::Unknown => why_not.push("mode_unknown".to_string()),
    }

    DiskReport {
        name: disk.name.clone(),
        path: disk.dev_path(),
        size: disk.size.as_ref().and_then(value_text),
        model: disk.model.as_ref().map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
        serial: disk.serial.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        tran: disk.tran.clone(),
        mounted_partitions,
        mountpoints,
        is_root_parent,
        allowed: why_not.is_empty(),
        why_not,
    }
}

fn collect_mounted_children(
    children: &[LsblkDevice],
    partitions: &mut Vec<String>,
    mountpoints: &mut Vec<String>,
) {
    for child in children {
        let points = child.own_mountpoints();
        if !points.is_empty() {
            partitions.push(child.dev_path());
            mountpoints.extend(points);
        }
        collect_mounted_children(&child.children, partitions, mountpoints);
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn run(argv: &[&str]) -> Result<String, TargetError> {
    let (program, args) = argv.split_first().ok_or_else(|| TargetError::CommandFailed {
        program: String::new(),
        code: None,
        stderr: "empty argv".to_string(),
    })?;
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| TargetError::Command {
            program: program.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(TargetError::CommandFailed {
            program: program.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
   "blockdevices": [
      {"name":"mmcblk0", "path":"/dev/mmcblk0", "size":"29.7G", "model":null, "serial":"0x1234abcd", "tran":null, "rm":false, "ro":false, "type":"disk", "mountpoints":[null],
         "children": [
            {"name":"mmcblk0p1", "path":"/dev/mmcblk0p1", "size":"512M", "type":"part", "ro":false, "mountpoints":["/boot/firmware"]},
            {"name":"mmcblk0p2", "path":"/dev/mmcblk0p2", "size":"29.2G", "type":"part", "ro":false, "mountpoints":["/"]}
         ]
      },
      {"name":"nvme0n1", "path":"/dev/nvme0n1", "size":"238.5G", "model":"WD SN740 ", "serial":"22411E801234", "tran":"nvme", "rm":false, "ro":false, "type":"disk", "mountpoints":[null],
         "children": [
            {"name":"nvme0n1p1", "path":"/dev/nvme0n1p1", "size":"512M", "type":"part", "ro":false, "mountpoints":["/media/old-boot"]}
         ]
      },
      {"name":"sda", "path":"/dev/sda", "size":"57.3G", "model":"Flash Drive", "serial":"AA00", "tran":"usb", "rm":true, "ro":false, "type":"disk", "mountpoints":[null]},
      {"name":"zram0", "path":"/dev/zram0", "size":"2G", "type":"disk", "ro":false, "mountpoints":["[SWAP]"]}
   ]
}"#;

    fn by_name<'a>(disks: &'a [DiskReport], name: &str) -> &'a DiskReport {
        disks.iter().find(|d| d.name == name).unwrap()
    }

    #[test]
    fn test_detect_mode() {
        assert_eq!(detect_mode("mmcblk0"), BootMode::Sd);
        assert_eq!(detect_mode("nvme0n1"), BootMode::Nvme);
        assert_eq!(detect_mode("sda"), BootMode::Unknown);
        assert_eq!(detect_mode(""), BootMode::Unknown);
    }

    #[test]
    fn test_parent_from_partition() {
        assert_eq!(parent_from_partition("/dev/mmcblk0p2"), "mmcblk0");
        assert_eq!(parent_from_partition("/dev/nvme0n1p2"), "nvme0n1");
        assert_eq!(parent_from_partition("/dev/sda1"), "sda");
        assert_eq!(parent_from_partition("nvme0n1"), "nvme0n1");
    }

    #[test]
    fn test_sd_boot_allows_only_nvme() {
        let devices = parse_lsblk(SAMPLE).unwrap();
        let disks = classify(BootMode::Sd, "mmcblk0", &devices);

        assert_eq!(disks.len(), 3, "zram must be skipped");

        let root = by_name(&disks, "mmcblk0");
        assert!(root.is_root_parent);
        assert!(!root.allowed);
        assert!(root.why_not.contains(&"is_root_parent".to_string()));

        let nvme = by_name(&disks, "nvme0n1");
        assert!(nvme.allowed);
        assert_eq!(nvme.mounted_partitions, vec!["/dev/nvme0n1p1"]);
        assert_eq!(nvme.model.as_deref(), Some("WD SN740"));

        let usb = by_name(&disks, "sda");
        assert!(!usb.allowed);
        assert_eq!(usb.why_not, vec!["mode_SD_allows_only_nvme_targets"]);
    }

    #[test]
    fn test_nvme_boot_allows_sd_and_usb() {
        let devices = parse_lsblk(SAMPLE).unwrap();
        let disks = classify(BootMode::Nvme, "nvme0n1", &devices);

        assert!(by_name(&disks, "mmcblk0").allowed);
        assert!(by_name(&disks, "sda").allowed);
        assert!(!by_name(&disks, "nvme0n1").allowed);
    }

    #[test]
    fn test_unknown_mode_allows_nothing() {
        let devices = parse_lsblk(SAMPLE).unwrap();
        let disks = classify(BootMode::Unknown, "", &devices);
        assert!(disks.iter().all(|d| !d.allowed));
    }

    #[test]
    fn test_read_only_disk_excluded() {
        let raw = r#"{"blockdevices":[{"name":"sdb","path":"/dev/sdb","tran":"usb","ro":"1","type":"disk"}]}"#;
        let disks = classify(BootMode::Nvme, "nvme0n1", &parse_lsblk(raw).unwrap());
        assert_eq!(disks[0].why_not, vec!["read_only"]);
    }

    #[test]
    fn test_snapshot_eligible_lookup() {
        let targets = StaticTargets::allowing(["/dev/sdb"]).with_serial("/dev/sdb", "XYZ123");
        let snapshot = targets.snapshot().unwrap();

        assert_eq!(snapshot.eligible("/dev/sdb").unwrap().serial.as_deref(), Some("XYZ123"));
        assert!(snapshot.eligible("/dev/sdc").is_none());
    }
}
