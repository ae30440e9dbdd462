//! Job poll loop and command dispatch.
//!
//! Scans the job table for pending commands on a fixed interval and
//! drives the process supervisor. Every failure is contained at the
//! job boundary: a bad command or a failed launch becomes a job status
//! with a message, never a crashed loop. A failed table scan backs off
//! and retries forever.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use sorter_core::{Job, JobCommand, JobStatus, ServiceKey};
use sorter_store::{MetadataStore, StoreError};

use crate::artifact::ModelArtifactCache;
use crate::process::{ProcessSupervisor, StartOutcome, StopOutcome};

/// Extra delay after a failed job-table scan.
const SCAN_BACKOFF: Duration = Duration::from_secs(10);

/// Delay between the camera and bridge starts in `start_all`, giving
/// the camera stack time to come up before the bridge attaches.
const START_ALL_SETTLE: Duration = Duration::from_secs(2);

/// Launch command lines per service; `{model_path}` is substituted
/// where present.
#[derive(Debug, Clone)]
pub struct ServiceCommands {
    pub camera_bringup: String,
    pub sdm_bridge: String,
}

impl ServiceCommands {
    fn template(&self, service: ServiceKey) -> &str {
        match service {
            ServiceKey::CameraBringup => &self.camera_bringup,
            ServiceKey::SdmBridge => &self.sdm_bridge,
        }
    }
}

pub struct JobController {
    meta: Arc<dyn MetadataStore>,
    supervisor: Arc<ProcessSupervisor>,
    artifacts: Arc<ModelArtifactCache>,
    commands: ServiceCommands,
    send_enabled: watch::Sender<bool>,
    poll_interval: Duration,
    /// Job ids already dispatched in this run. A job is processed at
    /// most once per controller run; re-observing it is a no-op.
    processed: HashSet<String>,
}

impl JobController {
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        supervisor: Arc<ProcessSupervisor>,
        artifacts: Arc<ModelArtifactCache>,
        commands: ServiceCommands,
        send_enabled: watch::Sender<bool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            meta,
            supervisor,
            artifacts,
            commands,
            send_enabled,
            poll_interval,
            processed: HashSet::new(),
        }
    }

    /// Run the poll loop until `cancel` is triggered.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            "Job controller started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job controller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, backoff_secs = SCAN_BACKOFF.as_secs(),
                            "Job table scan failed, backing off");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(SCAN_BACKOFF) => {}
                        }
                    }
                }
            }
        }
    }

    /// One scan-and-dispatch pass.
    pub async fn poll_once(&mut self) -> Result<(), StoreError> {
        let jobs = self.meta.pending_jobs().await?;
        if !jobs.is_empty() {
            tracing::info!(pending = jobs.len(), "Found pending jobs");
        }

        for job in jobs {
            if !self.processed.insert(job.job_id.clone()) {
                continue;
            }
            tracing::info!(job_id = %job.job_id, command = %job.command, "Processing job");
            self.dispatch(&job).await;
        }
        Ok(())
    }

    async fn dispatch(&self, job: &Job) {
        let command = match job.command.parse::<JobCommand>() {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "Unknown job command");
                self.report(job, JobStatus::Failed, "Unknown command").await;
                return;
            }
        };

        match command {
            JobCommand::StartCameraBringup => {
                if self.start_service(ServiceKey::CameraBringup, job).await {
                    self.set_sending(true);
                }
            }
            JobCommand::StartSdmBridge => {
                self.start_service(ServiceKey::SdmBridge, job).await;
            }
            JobCommand::StopCameraBringup => {
                self.stop_service(ServiceKey::CameraBringup, job).await;
                self.set_sending(false);
            }
            JobCommand::StopSdmBridge => {
                self.stop_service(ServiceKey::SdmBridge, job).await;
            }
            JobCommand::StartAll => {
                let camera_ok = self.start_service(ServiceKey::CameraBringup, job).await;
                tokio::time::sleep(START_ALL_SETTLE).await;
                let bridge_ok = self.start_service(ServiceKey::SdmBridge, job).await;
                if camera_ok {
                    self.set_sending(true);
                }
                if camera_ok && bridge_ok {
                    self.report(job, JobStatus::Running, "All services started")
                        .await;
                } else {
                    self.report(job, JobStatus::Failed, "Not all services started")
                        .await;
                }
            }
            JobCommand::StopAll => {
                self.stop_service(ServiceKey::CameraBringup, job).await;
                self.stop_service(ServiceKey::SdmBridge, job).await;
                self.set_sending(false);
                self.report(job, JobStatus::Stopped, "All services stopped")
                    .await;
            }
        }
    }

    /// Start one service, reporting the outcome on the job. Returns
    /// whether a live process exists afterwards.
    async fn start_service(&self, service: ServiceKey, job: &Job) -> bool {
        let template = self.commands.template(service);
        let command_line = if template.contains("{model_path}") {
            let model_path = self.artifacts.resolve(job.model_url.as_deref()).await;
            template.replace("{model_path}", &model_path.to_string_lossy())
        } else {
            template.to_string()
        };

        match self.supervisor.start(service, &command_line).await {
            Ok(StartOutcome::Started { pid }) => {
                tracing::info!(service = %service, pid, "Service launch reported");
                self.report(job, JobStatus::Running, &format!("Started {service}"))
                    .await;
                true
            }
            Ok(StartOutcome::AlreadyRunning { pid }) => {
                tracing::info!(service = %service, pid, "Service was already running");
                self.report(job, JobStatus::Running, &format!("{service} already running"))
                    .await;
                true
            }
            Err(e) => {
                tracing::error!(service = %service, error = %e, "Service start failed");
                self.report(job, JobStatus::Failed, &e.to_string()).await;
                false
            }
        }
    }

    /// Stop one service, reporting the outcome on the job.
    async fn stop_service(&self, service: ServiceKey, job: &Job) {
        match self.supervisor.stop(service).await {
            Ok(StopOutcome::Stopped { graceful }) => {
                tracing::info!(service = %service, graceful, "Service stop reported");
                self.report(job, JobStatus::Stopped, &format!("Stopped {service}"))
                    .await;
            }
            Ok(StopOutcome::WasNotRunning) => {
                self.report(
                    job,
                    JobStatus::Stopped,
                    &format!("{service} was not running"),
                )
                .await;
            }
            Err(e) => {
                tracing::error!(service = %service, error = %e, "Service stop failed");
                self.report(job, JobStatus::Error, &e.to_string()).await;
            }
        }
    }

    fn set_sending(&self, enabled: bool) {
        self.send_enabled.send_replace(enabled);
        tracing::info!(enabled, "Detection sending toggled");
    }

    /// Best-effort status write; a store failure here is logged and
    /// swallowed so it cannot take down the loop.
    async fn report(&self, job: &Job, status: JobStatus, message: &str) {
        if let Err(e) = self
            .meta
            .update_job_status(&job.job_id, &job.user_id, status, message)
            .await
        {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to update job status");
        }
    }
}
