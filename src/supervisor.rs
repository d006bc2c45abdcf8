//! Registry of running forwards and the liveness sweep that reconciles it.
//!
//! # Locking
//!
//! The registry (forward map plus pending error slot) sits behind one
//! `RwLock`; the event log has its own lock. The two are never held at the
//! same time: every log append happens after the registry guard is dropped.
//! Signal delivery and waiting on a child also happen outside the registry
//! lock, so a hung forwarder only delays the request that stops it.
//!
//! # Usage
//!
//! `Supervisor` is shared behind an `Arc`. Starting a forward spawns a tokio
//! child process, so it must be called from within a tokio runtime.
//!
//! ```ignore
//! let supervisor = Supervisor::new(ForwarderConfig::default());
//! let id = supervisor.start_forward(&ForwardRequest::new("127.0.0.1", "9000", "10.0.0.5", "22"))?;
//! let status = supervisor.status();
//! supervisor.stop_forward(&id).await?;
//! ```

use crate::config::ForwarderConfig;
use crate::error::ForwardError;
use crate::eventlog::{EventKind, EventLog, LogEntry};
use crate::forward::{ForwardInfo, ForwardRecord, ForwardRequest};
use crate::liveness::{Liveness, LivenessChecker};
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// State guarded by the registry lock
#[derive(Default)]
struct Registry {
    forwards: HashMap<String, ForwardRecord>,
    pending_error: Option<String>,
}

/// Everything the status page needs, taken in one pass
#[derive(Debug, Clone)]
pub struct StatusView {
    pub forwards: Vec<ForwardInfo>,
    pub events: Vec<LogEntry>,
    pub error: Option<String>,
}

/// Owns every forwarder process and the event log.
pub struct Supervisor {
    registry: RwLock<Registry>,
    log: EventLog,
    liveness: Arc<dyn LivenessChecker>,
    config: ForwarderConfig,
}

impl Supervisor {
    /// Create a supervisor using the liveness probe named in `config`
    pub fn new(config: ForwarderConfig) -> Arc<Self> {
        let liveness = config.liveness_checker();
        Self::with_liveness(config, liveness)
    }

    /// Create a supervisor with an explicit liveness probe
    pub fn with_liveness(config: ForwarderConfig, liveness: Arc<dyn LivenessChecker>) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            log: EventLog::new(config.max_log_entries),
            liveness,
            config,
        })
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    /// Number of tracked forwards
    pub fn len(&self) -> usize {
        self.registry.read().forwards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.read().forwards.contains_key(id)
    }

    /// Validate the request and spawn a forwarder for it.
    ///
    /// Nothing is spawned or recorded unless validation passes. Returns the
    /// new forward's id.
    pub fn start_forward(&self, request: &ForwardRequest) -> Result<String, ForwardError> {
        let spec = request.validate()?;
        let listen = spec.listen_spec();
        let target = spec.target_spec();
        let program = &self.config.program;

        let mut cmd = Command::new(program);
        cmd.args(&self.config.args);
        cmd.arg(&listen);
        cmd.arg(&target);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            error!(program = %program, error = %e, "Error starting forwarder process");
            if e.kind() == io::ErrorKind::NotFound {
                ForwardError::ToolNotFound {
                    program: program.clone(),
                }
            } else {
                ForwardError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        let pid = child.id().unwrap_or(0);
        let id = Uuid::new_v4().to_string();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stream_stderr(id.clone(), pid, stderr));
        }

        let record = ForwardRecord {
            id: id.clone(),
            spec,
            pid,
            started_at: Local::now(),
            child: Mutex::new(child),
        };
        let details = record.describe();

        self.registry.write().forwards.insert(id.clone(), record);

        info!(forward_id = %id, pid, %listen, %target, "Started forward");
        self.log.append(EventKind::Start, details);

        Ok(id)
    }

    /// Stop a forward by id.
    ///
    /// The record leaves the registry before any signal is sent, so a second
    /// stop for the same id misses and does nothing. Termination problems are
    /// only logged; once the record is removed the stop has succeeded.
    pub async fn stop_forward(&self, id: &str) -> Result<(), ForwardError> {
        let record = self
            .registry
            .write()
            .forwards
            .remove(id)
            .ok_or_else(|| ForwardError::NotFound(id.to_string()))?;

        // Appended after the registry guard drops: a concurrent status read may
        // briefly see the record gone before its Stop entry.
        self.log.append(EventKind::Stop, record.describe());
        info!(forward_id = %id, pid = record.pid, "Stopping forward");

        self.terminate(record).await;
        Ok(())
    }

    /// Stop every tracked forward
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.registry.read().forwards.keys().cloned().collect();
        for id in ids {
            // A concurrent stop or sweep may already have taken it
            if let Err(e) = self.stop_forward(&id).await {
                debug!(forward_id = %id, error = %e, "Forward already gone during stop_all");
            }
        }
    }

    /// Remove every forward whose process is confirmed dead.
    ///
    /// A child that has exited (and is reaped here) is dead without asking the
    /// liveness probe. Inconclusive probes keep the forward tracked.
    pub fn sweep(&self) {
        let tracked: Vec<(String, u32, bool)> = self
            .registry
            .read()
            .forwards
            .values()
            .map(|r| (r.id.clone(), r.pid, has_exited(r)))
            .collect();

        let dead: Vec<String> = tracked
            .into_iter()
            .filter_map(|(id, pid, exited)| {
                let liveness = if exited {
                    Liveness::Dead
                } else {
                    self.liveness.is_alive(pid)
                };
                match liveness {
                    Liveness::Alive => None,
                    Liveness::Dead => {
                        info!(forward_id = %id, pid, exited, "Detected dead forward process");
                        Some(id)
                    }
                    Liveness::Unknown => {
                        warn!(forward_id = %id, pid, "Could not determine liveness, keeping forward");
                        None
                    }
                }
            })
            .collect();

        if dead.is_empty() {
            return;
        }

        let removed: Vec<ForwardRecord> = {
            let mut registry = self.registry.write();
            dead.iter()
                .filter_map(|id| registry.forwards.remove(id))
                .collect()
        };

        for record in removed {
            self.log.append(EventKind::Died, record.describe());
            reap_exited(&record);
        }
    }

    /// Tracked forwards (oldest first) and the pending error, which is cleared.
    pub fn snapshot(&self) -> (Vec<ForwardInfo>, Option<String>) {
        let mut registry = self.registry.write();
        let forwards = sorted_infos(&registry.forwards);
        let error = registry.pending_error.take();
        (forwards, error)
    }

    /// Tracked forwards without touching the pending error
    pub fn forwards(&self) -> Vec<ForwardInfo> {
        sorted_infos(&self.registry.read().forwards)
    }

    /// Replace the pending error shown on the next status read
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(error = %message, "Pending error set");
        self.registry.write().pending_error = Some(message);
    }

    /// Sweep, then snapshot the registry and the event log
    pub fn status(&self) -> StatusView {
        self.sweep();
        let (forwards, error) = self.snapshot();
        let events = self.log.snapshot();
        StatusView {
            forwards,
            events,
            error,
        }
    }

    /// Signal a removed forward and reap it
    async fn terminate(&self, mut record: ForwardRecord) {
        let id = record.id.clone();
        let pid = record.pid;
        let child = record.child.get_mut();

        match child.try_wait() {
            Ok(Some(status)) => {
                info!(forward_id = %id, pid, ?status, "Forward process had already exited");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                debug!(forward_id = %id, pid, error = %e, "Could not poll forward process");
            }
        }

        match send_sigterm(pid, child) {
            Ok(()) => info!(forward_id = %id, pid, "Sent SIGTERM to forward process"),
            Err(e) => {
                warn!(forward_id = %id, pid, error = %e, "Failed to send SIGTERM, attempting SIGKILL");
                match child.start_kill() {
                    Ok(()) => info!(forward_id = %id, pid, "Sent SIGKILL to forward process"),
                    Err(e) => warn!(forward_id = %id, pid, error = %e, "Failed to send SIGKILL"),
                }
            }
        }

        let wait_result = match self.config.stop_timeout() {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            forward_id = %id,
                            pid,
                            timeout_secs = limit.as_secs(),
                            "Forward process did not exit in time, sending SIGKILL"
                        );
                        if let Err(e) = child.start_kill() {
                            warn!(forward_id = %id, pid, error = %e, "Failed to send SIGKILL");
                        }
                        child.wait().await
                    }
                }
            }
            None => child.wait().await,
        };

        match wait_result {
            Ok(status) => info!(forward_id = %id, pid, ?status, "Forward process exited"),
            Err(e) if is_benign_wait_error(&e) => {}
            Err(e) => warn!(forward_id = %id, pid, error = %e, "Error waiting for forward process to exit"),
        }
    }
}

fn sorted_infos(forwards: &HashMap<String, ForwardRecord>) -> Vec<ForwardInfo> {
    let mut infos: Vec<ForwardInfo> = forwards.values().map(ForwardRecord::info).collect();
    infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
    infos
}

#[cfg(unix)]
fn send_sigterm(pid: u32, _child: &mut Child) -> io::Result<()> {
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if pid <= 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "no pid for forward process"));
    }

    // SAFETY: kill(2) with a positive pid targets exactly that process.
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32, child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// No such child, or already reaped
fn is_benign_wait_error(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::ECHILD)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

/// Poll the child without blocking; an exited child is reaped here
fn has_exited(record: &ForwardRecord) -> bool {
    match record.child.lock().try_wait() {
        Ok(Some(_)) => true,
        Ok(None) => false,
        Err(e) => {
            if !is_benign_wait_error(&e) {
                debug!(forward_id = %record.id, pid = record.pid, error = %e, "Could not poll forward process");
            }
            false
        }
    }
}

/// Collect the exit status of a forward the sweep found dead
fn reap_exited(record: &ForwardRecord) {
    match record.child.lock().try_wait() {
        Ok(Some(status)) => debug!(forward_id = %record.id, pid = record.pid, ?status, "Reaped dead forward"),
        Ok(None) => warn!(
            forward_id = %record.id,
            pid = record.pid,
            "Forward reported dead but has not exited, releasing handle"
        ),
        Err(e) if is_benign_wait_error(&e) => {}
        Err(e) => warn!(forward_id = %record.id, pid = record.pid, error = %e, "Error reaping dead forward"),
    }
}

/// Re-emit forwarder stderr as tracing events until the pipe closes
async fn stream_stderr(id: String, pid: u32, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!(forward_id = %id, pid, %line, "Forwarder stderr"),
            Ok(None) => break,
            Err(e) => {
                debug!(forward_id = %id, pid, error = %e, "Stopped reading forwarder stderr");
                break;
            }
        }
    }
}
