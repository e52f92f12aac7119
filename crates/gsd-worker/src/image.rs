//! Image formats and the decompress-and-write step.
//!
//! Each compressed format maps to one fixed decompressor invocation whose
//! stdout is copied straight onto the target device. Raw images are copied
//! directly.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};
use crate::log::{pump_lines, JobLog};
use crate::runner::ChildSlot;

const COPY_BUFFER_BYTES: usize = 4 * 1024 * 1024;
const PROGRESS_EVERY_BYTES: u64 = 256 * 1024 * 1024;

/// Supported on-disk image encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Raw,
    Xz,
    Gzip,
    Zip,
}

impl ImageFormat {
    /// Pick a format from a file name or URL by its extension.
    pub fn from_name(name: &str) -> Self {
        let path = name
            .split(['?', '#'])
            .next()
            .unwrap_or(name)
            .to_ascii_lowercase();
        if path.ends_with(".xz") {
            ImageFormat::Xz
        } else if path.ends_with(".gz") || path.ends_with(".gzip") {
            ImageFormat::Gzip
        } else if path.ends_with(".zip") {
            ImageFormat::Zip
        } else {
            ImageFormat::Raw
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Xz => "xz",
            ImageFormat::Gzip => "gzip",
            ImageFormat::Zip => "zip",
        }
    }

    /// Decompressor writing the image to stdout, or `None` for raw images.
    pub fn decompressor(&self, source: &Path) -> Option<Command> {
        let mut cmd = match self {
            ImageFormat::Raw => return None,
            ImageFormat::Xz => {
                let mut c = Command::new("xz");
                c.args(["-d", "-c", "--"]);
                c
            }
            ImageFormat::Gzip => {
                let mut c = Command::new("gzip");
                c.args(["-d", "-c", "--"]);
                c
            }
            ImageFormat::Zip => {
                let mut c = Command::new("unzip");
                c.arg("-p");
                c
            }
        };
        cmd.arg(source);
        Some(cmd)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream `source` (decoded per `format`) onto `target` and flush it to the
/// device. Returns the number of bytes written.
pub fn write_image(
    source: &Path,
    format: ImageFormat,
    target: &Path,
    log: &JobLog,
    child: &ChildSlot,
) -> WorkerResult<u64> {
    let mut device = OpenOptions::new()
        .write(true)
        .open(target)
        .map_err(|e| WorkerError::Write(format!("cannot open {}: {}", target.display(), e)))?;

    let written = match format.decompressor(source) {
        None => {
            let mut input = File::open(source)
                .map_err(|e| WorkerError::Write(format!("cannot open {}: {}", source.display(), e)))?;
            copy_with_progress(&mut input, &mut device)
                .map_err(|e| WorkerError::Write(e.to_string()))?
        }
        Some(mut cmd) => {
            let program = format.to_string();
            cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
            let mut proc = cmd.spawn().map_err(|source| WorkerError::Spawn {
                program: program.clone(),
                source,
            })?;
            child.set(proc.id());

            let stderr_pump = pump_lines(proc.stderr.take(), log.clone(), "[stderr] ");
            let copied = match proc.stdout.take() {
                Some(mut stdout) => copy_with_progress(&mut stdout, &mut device),
                None => Err(io::Error::other("decompressor stdout unavailable")),
            };
            if copied.is_err() {
                let _ = proc.kill();
            }
            let status = proc.wait();
            child.clear();
            if let Some(handle) = stderr_pump {
                let _ = handle.join();
            }

            let copied = copied.map_err(|e| WorkerError::Write(e.to_string()))?;
            let status = status?;
            if !status.success() {
                return Err(WorkerError::Write(format!(
                    "{} decompressor exited with {:?}",
                    program,
                    status.code()
                )));
            }
            copied
        }
    };

    device
        .sync_all()
        .map_err(|e| WorkerError::Write(format!("sync of {} failed: {}", target.display(), e)))?;
    tracing::info!(bytes = written, "image written and synced");
    Ok(written)
}

fn copy_with_progress<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_BYTES];
    let mut total = 0u64;
    let mut next_report = PROGRESS_EVERY_BYTES;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
        if total >= next_report {
            tracing::info!(bytes = total, "write progress");
            next_report += PROGRESS_EVERY_BYTES;
        }
    }
    writer.flush()?;
    Ok(total)
}
