//! Process liveness.

/// Answers whether a pid currently names a live process.
pub trait PidLiveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// A previously observed operating-system process.
///
/// A live answer only says *some* process holds the pid; it may have been
/// reused. The resolver only consults this while no completion code exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Checked with signal 0. `EPERM` still means the process exists.
    #[cfg(unix)]
    pub fn is_alive(&self) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let raw = match i32::try_from(self.pid) {
            Ok(raw) if raw > 0 => raw,
            _ => return false,
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    pub fn is_alive(&self) -> bool {
        false
    }
}

/// [`PidLiveness`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPids;

impl PidLiveness for SystemPids {
    fn is_alive(&self, pid: u32) -> bool {
        ProcessHandle::new(pid).is_alive()
    }
}
