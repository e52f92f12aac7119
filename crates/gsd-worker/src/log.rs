//! Job log plumbing.
//!
//! The log is a single append-only file. Structured events from the worker
//! itself go through `tracing`; child process output is copied in verbatim,
//! one line at a time.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing_subscriber::EnvFilter;

/// Shared handle on a job's log file.
#[derive(Debug, Clone)]
pub struct JobLog {
    file: Arc<Mutex<File>>,
}

impl JobLog {
    /// Open (or create) the log in append mode.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Append one raw line. Write failures are swallowed: losing a log line
    /// must never change the job's outcome.
    pub fn line(&self, text: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "{}", text);
        }
    }

    /// A `tracing` subscriber that formats events into this log.
    ///
    /// `RUST_LOG` is honoured; the default level is `info`.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let log = self.clone();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_target(false)
            .with_writer(move || log.clone())
            .finish()
    }
}

impl Write for JobLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|_| io::Error::other("job log lock poisoned"))?;
        f.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|_| io::Error::other("job log lock poisoned"))?;
        f.flush()
    }
}

/// Copy a child's output into the log on a background thread.
pub fn pump_lines<R>(reader: Option<R>, log: JobLog, prefix: &'static str) -> Option<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let reader = reader?;
    Some(thread::spawn(move || {
        for line in BufReader::new(reader).lines().map_while(Result::ok) {
            log.line(&format!("{}{}", prefix, line));
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");

        let log = JobLog::open(&path).unwrap();
        log.line("first");
        let again = JobLog::open(&path).unwrap();
        again.line("second");

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_pump_lines_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        let log = JobLog::open(&path).unwrap();

        let handle = pump_lines(Some(io::Cursor::new(b"a\nb\n".to_vec())), log, "[stderr] ").unwrap();
        handle.join().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[stderr] a\n[stderr] b\n");
    }
}
