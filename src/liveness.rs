//! Process liveness probes used by the supervisor sweep
//!
//! A probe answers one question for a pid: alive, dead, or unknown. Only a
//! definitive `Dead` lets the sweep reclaim a forward; anything inconclusive
//! keeps it tracked.

use std::io;
use std::path::PathBuf;
use tracing::debug;

/// Outcome of a liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The probe failed for a reason other than absence
    Unknown,
}

/// Capability to decide whether a process id still refers to a live process
pub trait LivenessChecker: Send + Sync {
    fn is_alive(&self, pid: u32) -> Liveness;
}

/// Probes `<proc_root>/<pid>/cwd`.
///
/// The `cwd` link disappears as soon as a process exits, even while it is
/// still an unreaped zombie, so a forward whose child has not been waited on
/// is still reported dead.
#[derive(Debug, Clone)]
pub struct ProcFsChecker {
    proc_root: PathBuf,
}

impl ProcFsChecker {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn probe_path(&self, pid: u32) -> PathBuf {
        self.proc_root.join(pid.to_string()).join("cwd")
    }
}

impl Default for ProcFsChecker {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl LivenessChecker for ProcFsChecker {
    fn is_alive(&self, pid: u32) -> Liveness {
        let path = self.probe_path(pid);
        match std::fs::metadata(&path) {
            Ok(_) => Liveness::Alive,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Liveness::Dead,
            Err(e) => {
                debug!(pid, path = %path.display(), error = %e, "Inconclusive liveness probe");
                Liveness::Unknown
            }
        }
    }
}

/// Probes with signal 0, for platforms without a process filesystem.
///
/// Zombies still answer the probe, so this checker only reports death once the
/// process has been reaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbeChecker;

#[cfg(unix)]
impl LivenessChecker for SignalProbeChecker {
    fn is_alive(&self, pid: u32) -> Liveness {
        let Ok(raw_pid) = i32::try_from(pid) else {
            return Liveness::Unknown;
        };

        // SAFETY: signal 0 performs permission and existence checks only.
        let result = unsafe { libc::kill(raw_pid, 0) };
        if result == 0 {
            return Liveness::Alive;
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Liveness::Dead,
            // Exists, owned by someone else
            Some(libc::EPERM) => Liveness::Alive,
            _ => {
                debug!(pid, error = %err, "Inconclusive liveness probe");
                Liveness::Unknown
            }
        }
    }
}

#[cfg(not(unix))]
impl LivenessChecker for SignalProbeChecker {
    fn is_alive(&self, _pid: u32) -> Liveness {
        Liveness::Unknown
    }
}
