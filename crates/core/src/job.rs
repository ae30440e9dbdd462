//! Lifecycle jobs read from the shared job table.
//!
//! Jobs are created externally (the dashboard enqueues a command) and
//! mutated only by the job controller. The command vocabulary maps
//! onto two logical services plus the start-all / stop-all composites.

use std::fmt;
use std::str::FromStr;

/// Logical service a job command targets. At most one live process
/// exists per key at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKey {
    CameraBringup,
    SdmBridge,
}

impl ServiceKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKey::CameraBringup => "camera_bringup",
            ServiceKey::SdmBridge => "sdm_bridge",
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command vocabulary accepted from the job table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCommand {
    StartCameraBringup,
    StartSdmBridge,
    StopCameraBringup,
    StopSdmBridge,
    StartAll,
    StopAll,
}

/// Raised when a job row carries a command outside the vocabulary.
#[derive(Debug, thiserror::Error)]
#[error("unknown job command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for JobCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_camera_bringup" => Ok(JobCommand::StartCameraBringup),
            "start_sdm_bridge" => Ok(JobCommand::StartSdmBridge),
            "stop_camera_bringup" => Ok(JobCommand::StopCameraBringup),
            "stop_sdm_bridge" => Ok(JobCommand::StopSdmBridge),
            "start_all" => Ok(JobCommand::StartAll),
            "stop_all" => Ok(JobCommand::StopAll),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

/// Job state machine: `pending -> {running, failed}`, then
/// `running -> {stopped, error}` via a subsequent stop command.
/// Terminal states are only re-entered by a new job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Stopped,
    Failed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Stopped => "stopped",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending job row as read from the store. The command is kept as
/// raw text so the controller can mark unknown commands `failed`
/// instead of dropping them at the parse boundary.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub user_id: String,
    pub command: String,
    pub model_url: Option<String>,
}
