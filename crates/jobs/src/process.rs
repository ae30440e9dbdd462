//! Supervision of external perception processes.
//!
//! Each logical service key maps to at most one live handle, owned
//! exclusively by the supervisor. Services are launched in their own
//! process group so the whole subtree (launch wrapper plus nodes) can
//! be signalled together. Stop is graceful-then-forced: SIGTERM to the
//! group, a bounded grace period, then SIGKILL.

use std::collections::HashMap;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use sorter_core::ServiceKey;

/// Grace period between SIGTERM and SIGKILL.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A launched service process. Exists only while the OS process is
/// alive (dead handles are reaped on the next start of the same key).
struct ProcessHandle {
    pid: u32,
    child: Child,
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    /// The service already had a live process; nothing was spawned.
    AlreadyRunning { pid: u32 },
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { graceful: bool },
    /// No handle was tracked for the key; no signal was sent.
    WasNotRunning,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {service}: {source}")]
    Spawn {
        service: ServiceKey,
        source: std::io::Error,
    },

    #[error("failed waiting on {service}: {source}")]
    Wait {
        service: ServiceKey,
        source: std::io::Error,
    },
}

/// Owns the table of live service processes.
pub struct ProcessSupervisor {
    shell: String,
    handles: Mutex<HashMap<ServiceKey, ProcessHandle>>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::with_shell("sh")
    }
}

/// Signal every process in `pid`'s group. Best-effort: the group may
/// already be gone.
fn signal_group(pid: u32, signal: i32) {
    let rc = unsafe { libc::killpg(pid as i32, signal) };
    if rc != 0 {
        tracing::debug!(pid, signal, "killpg returned an error (group likely gone)");
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch commands through a specific shell binary instead of `sh`.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            handles: Mutex::default(),
        }
    }

    /// Start a service if it is not already running.
    ///
    /// The command line runs under the configured shell (`sh -c` by
    /// default) in a fresh process group.
    /// A live handle for the key makes this a no-op reporting the
    /// existing pid; a dead handle is reaped first.
    pub async fn start(
        &self,
        service: ServiceKey,
        command_line: &str,
    ) -> Result<StartOutcome, ProcessError> {
        let mut handles = self.handles.lock().await;

        if let Some(handle) = handles.get_mut(&service) {
            match handle.child.try_wait() {
                Ok(None) => {
                    tracing::warn!(
                        service = %service,
                        pid = handle.pid,
                        "Service already running, skipping start"
                    );
                    return Ok(StartOutcome::AlreadyRunning { pid: handle.pid });
                }
                Ok(Some(status)) => {
                    tracing::info!(service = %service, %status, "Reaping exited service handle");
                    handles.remove(&service);
                }
                Err(e) => {
                    tracing::warn!(service = %service, error = %e, "Discarding unpollable handle");
                    handles.remove(&service);
                }
            }
        }

        tracing::info!(service = %service, command = command_line, "Starting service");

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command_line)
            .process_group(0)
            .spawn()
            .map_err(|source| ProcessError::Spawn { service, source })?;

        let pid = child.id().unwrap_or_default();
        handles.insert(service, ProcessHandle { pid, child });

        tracing::info!(service = %service, pid, "Service started");
        Ok(StartOutcome::Started { pid })
    }

    /// Stop a service's process group, escalating to SIGKILL after the
    /// grace period. The handle is dropped only once the process is
    /// confirmed gone; when the wait itself fails the handle goes back
    /// into the table so the child stays tracked.
    pub async fn stop(&self, service: ServiceKey) -> Result<StopOutcome, ProcessError> {
        let handle = self.handles.lock().await.remove(&service);
        let Some(mut handle) = handle else {
            tracing::info!(service = %service, "Service not running, nothing to stop");
            return Ok(StopOutcome::WasNotRunning);
        };

        tracing::info!(service = %service, pid = handle.pid, "Stopping service");
        signal_group(handle.pid, libc::SIGTERM);

        match tokio::time::timeout(STOP_GRACE_PERIOD, handle.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(service = %service, %status, "Service stopped gracefully");
                Ok(StopOutcome::Stopped { graceful: true })
            }
            Ok(Err(source)) => {
                self.handles.lock().await.insert(service, handle);
                Err(ProcessError::Wait { service, source })
            }
            Err(_elapsed) => {
                tracing::warn!(
                    service = %service,
                    grace_secs = STOP_GRACE_PERIOD.as_secs(),
                    "Service ignored SIGTERM, sending SIGKILL"
                );
                signal_group(handle.pid, libc::SIGKILL);
                match handle.child.wait().await {
                    Ok(_status) => {
                        tracing::info!(service = %service, "Service killed");
                        Ok(StopOutcome::Stopped { graceful: false })
                    }
                    Err(source) => {
                        self.handles.lock().await.insert(service, handle);
                        Err(ProcessError::Wait { service, source })
                    }
                }
            }
        }
    }

    /// Whether a live process is tracked for the key.
    pub async fn is_running(&self, service: ServiceKey) -> bool {
        let mut handles = self.handles.lock().await;
        match handles.get_mut(&service) {
            Some(handle) => matches!(handle.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Number of tracked handles (live or not yet reaped).
    pub async fn tracked_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Stop every tracked service. Used on agent shutdown.
    pub async fn shutdown_all(&self) {
        let keys: Vec<ServiceKey> = self.handles.lock().await.keys().copied().collect();
        for service in keys {
            if let Err(e) = self.stop(service).await {
                tracing::error!(service = %service, error = %e, "Shutdown stop failed");
            }
        }
    }
}
