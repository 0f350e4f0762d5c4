// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Active job monitor.
//!
//! Supervises jobs that hold an instance. Each tick claims one job and:
//!
//! 1. TERMINATING: terminates the instance and moves the job to its final status
//! 2. instance running: promotes PROVISIONING/PULLING jobs to RUNNING
//! 3. instance still booting past the provisioning timeout: failed start
//! 4. instance gone: lost instance
//!
//! Failed starts and lost instances go through the retry policy, which sends
//! the job back to PENDING while its retry budget lasts and fails it after.

use chrono::Utc;
use hangar_core::ResourceLocker;
use hangar_core::models::{
    InstanceStatus, Job, JobProvisioningData, JobStatus, JobTerminationReason, ResourceKind,
};
use hangar_core::persistence::{Claim, JobUpdate, Persistence, to_chrono};
use hangar_core::retry::{self, ResubmissionDecision};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backends::{BackendError, BackendRegistry, Compute, InstanceState};
use crate::error::Result;
use crate::pipeline::PipelineHinter;
use crate::scheduler::JOBS_LOCKSET;
use crate::ticker::spawn_periodic;

/// Statuses the monitor supervises.
pub const MONITORED_STATUSES: [JobStatus; 4] = [
    JobStatus::Provisioning,
    JobStatus::Pulling,
    JobStatus::Running,
    JobStatus::Terminating,
];

/// Configuration for the job monitor.
#[derive(Debug, Clone)]
pub struct JobMonitorConfig {
    /// How often to check a job.
    pub poll_interval: Duration,
    /// Lease taken on a job while it is checked.
    pub lease: Duration,
    /// How long an instance may stay booting, measured from submission.
    pub provisioning_timeout: Duration,
}

impl Default for JobMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            lease: Duration::from_secs(60),
            provisioning_timeout: Duration::from_secs(600),
        }
    }
}

/// Status a job has after a monitoring pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOutcome {
    /// Job that was checked.
    pub job_id: Uuid,
    /// Its status after the pass.
    pub status: JobStatus,
}

/// Supervises jobs that hold an instance.
pub struct JobMonitor {
    persistence: Arc<dyn Persistence>,
    backends: Arc<BackendRegistry>,
    locker: Arc<ResourceLocker>,
    hinter: PipelineHinter,
    config: JobMonitorConfig,
}

impl JobMonitor {
    /// Create a new job monitor.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        backends: Arc<BackendRegistry>,
        locker: Arc<ResourceLocker>,
        hinter: PipelineHinter,
        config: JobMonitorConfig,
    ) -> Self {
        Self {
            persistence,
            backends,
            locker,
            hinter,
            config,
        }
    }

    /// Run the monitor every poll interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.poll_interval;
        spawn_periodic("job_monitor", interval, cancel, move || {
            let monitor = self.clone();
            async move { monitor.process_next().await.map(|_| ()) }
        })
    }

    /// Claim and check one active job.
    pub async fn process_next(&self) -> Result<Option<MonitorOutcome>> {
        let lockset = self.locker.get_lockset(JOBS_LOCKSET);

        let (job, lock_token, _guard) = {
            let _namespace = lockset.lock().await;
            let exclude = lockset.locked_ids();
            let claim = Claim::new(self.config.lease, &exclude);
            let Some(job) = self
                .persistence
                .claim_job(&MONITORED_STATUSES, &claim)
                .await?
            else {
                return Ok(None);
            };
            let Some(guard) = lockset.try_claim([job.id]) else {
                self.persistence
                    .release_job(job.id, claim.lock_token, &JobUpdate::default())
                    .await?;
                return Ok(None);
            };
            (job, claim.lock_token, guard)
        };

        let result = if job.status == JobStatus::Terminating {
            self.terminate(&job, lock_token).await
        } else {
            self.check(&job, lock_token).await
        };

        match result {
            Ok(status) => Ok(Some(MonitorOutcome {
                job_id: job.id,
                status,
            })),
            Err(e) => {
                if let Err(release_err) = self
                    .persistence
                    .release_job(job.id, lock_token, &JobUpdate::default())
                    .await
                {
                    warn!(job_id = %job.id, error = %release_err, "Failed to release job");
                }
                Err(e)
            }
        }
    }

    async fn backend_for(
        &self,
        job: &Job,
        data: &JobProvisioningData,
    ) -> Result<Option<Arc<dyn Compute>>> {
        self.backends
            .get_backend(self.persistence.as_ref(), &job.project_name, data.backend)
            .await
    }

    async fn terminate(&self, job: &Job, lock_token: Uuid) -> Result<JobStatus> {
        if let Some(data) = &job.job_provisioning_data {
            match self.backend_for(job, data).await? {
                Some(backend) => match terminate_instance(backend.as_ref(), data).await {
                    Ok(()) => {}
                    Err(e) => {
                        warn!(
                            job_id = %job.id,
                            instance_id = %data.instance_id,
                            error = %e,
                            "Failed to terminate instance, will retry"
                        );
                        self.release(job, lock_token, &JobUpdate::default()).await?;
                        return Ok(job.status);
                    }
                },
                None => {
                    warn!(
                        job_id = %job.id,
                        backend = %data.backend,
                        "Backend no longer configured, cannot terminate instance"
                    );
                }
            }
        }

        let status = job
            .termination_reason
            .map(|r| r.to_status())
            .unwrap_or(JobStatus::Terminated);
        let update = JobUpdate {
            status: Some(status),
            instance_status: Some(InstanceStatus::Terminated),
            ..Default::default()
        };
        if !self.release(job, lock_token, &update).await? {
            return Ok(job.status);
        }

        info!(job_id = %job.id, status = %status, "Job terminated");
        self.hinter.hint_fetch(ResourceKind::Fleet);
        Ok(status)
    }

    async fn check(&self, job: &Job, lock_token: Uuid) -> Result<JobStatus> {
        let Some(data) = &job.job_provisioning_data else {
            return self
                .apply_retry_policy(
                    job,
                    lock_token,
                    None,
                    JobTerminationReason::InstanceUnreachable,
                    "job has no provisioning data".to_string(),
                )
                .await;
        };

        let Some(backend) = self.backend_for(job, data).await? else {
            return self
                .apply_retry_policy(
                    job,
                    lock_token,
                    None,
                    JobTerminationReason::InstanceUnreachable,
                    format!("backend {} is no longer configured", data.backend),
                )
                .await;
        };

        let state = match backend.instance_state(data).await {
            Ok(state) => state,
            Err(e) => {
                debug!(
                    job_id = %job.id,
                    instance_id = %data.instance_id,
                    error = %e,
                    "Could not query instance state, will retry"
                );
                self.release(job, lock_token, &JobUpdate::default()).await?;
                return Ok(job.status);
            }
        };

        match state {
            InstanceState::Running => {
                if matches!(job.status, JobStatus::Provisioning | JobStatus::Pulling) {
                    let update = JobUpdate {
                        status: Some(JobStatus::Running),
                        instance_status: Some(InstanceStatus::Running),
                        ..Default::default()
                    };
                    if self.release(job, lock_token, &update).await? {
                        info!(job_id = %job.id, instance_id = %data.instance_id, "Job running");
                        return Ok(JobStatus::Running);
                    }
                } else {
                    self.release(job, lock_token, &JobUpdate::default()).await?;
                }
                Ok(job.status)
            }
            InstanceState::Provisioning => {
                let waited = Utc::now() - job.submitted_at;
                if waited > to_chrono(self.config.provisioning_timeout) {
                    return self
                        .apply_retry_policy(
                            job,
                            lock_token,
                            Some(backend.as_ref()),
                            JobTerminationReason::FailedToStart,
                            format!(
                                "instance did not start within {}s",
                                self.config.provisioning_timeout.as_secs()
                            ),
                        )
                        .await;
                }
                self.release(job, lock_token, &JobUpdate::default()).await?;
                Ok(job.status)
            }
            InstanceState::Gone => {
                self.apply_retry_policy(
                    job,
                    lock_token,
                    Some(backend.as_ref()),
                    JobTerminationReason::InstanceUnreachable,
                    format!("instance {} is no longer running", data.instance_id),
                )
                .await
            }
        }
    }

    async fn apply_retry_policy(
        &self,
        job: &Job,
        lock_token: Uuid,
        backend: Option<&dyn Compute>,
        reason: JobTerminationReason,
        message: String,
    ) -> Result<JobStatus> {
        if let (Some(backend), Some(data)) = (backend, &job.job_provisioning_data)
            && let Err(e) = terminate_instance(backend, data).await
        {
            warn!(
                job_id = %job.id,
                instance_id = %data.instance_id,
                error = %e,
                "Failed to terminate instance of failed job"
            );
        }

        let decision = retry::decide(job, reason, Utc::now());
        let update = match &decision {
            ResubmissionDecision::Resubmit => JobUpdate {
                status: Some(JobStatus::Pending),
                clear_provisioning: true,
                instance_status: Some(InstanceStatus::Terminated),
                ..Default::default()
            },
            ResubmissionDecision::Fail(reason) => JobUpdate {
                instance_status: Some(InstanceStatus::Terminated),
                ..JobUpdate::failed(*reason, message.clone())
            },
        };
        if !self.release(job, lock_token, &update).await? {
            return Ok(job.status);
        }

        match decision {
            ResubmissionDecision::Resubmit => {
                info!(job_id = %job.id, reason = %reason, "Job will be resubmitted");
            }
            ResubmissionDecision::Fail(_) => {
                info!(job_id = %job.id, reason = %reason, message = %message, "Job failed");
            }
        }
        self.hinter.hint_fetch(ResourceKind::Fleet);
        Ok(decision.status())
    }

    async fn release(&self, job: &Job, lock_token: Uuid, update: &JobUpdate) -> Result<bool> {
        let released = self
            .persistence
            .release_job(job.id, lock_token, update)
            .await?;
        if !released {
            warn!(job_id = %job.id, "Job lease lost, discarding update");
        }
        Ok(released)
    }
}

async fn terminate_instance(
    backend: &dyn Compute,
    data: &JobProvisioningData,
) -> std::result::Result<(), BackendError> {
    match backend
        .terminate_instance(&data.instance_id, &data.region, data.backend_data.as_deref())
        .await
    {
        Ok(()) | Err(BackendError::ResourceNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
