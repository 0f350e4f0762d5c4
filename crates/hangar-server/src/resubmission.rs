// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pending job resubmission.
//!
//! Moves PENDING jobs back to SUBMITTED once their backoff has elapsed. Only
//! one replica does this at a time, guarded by a database advisory lock; a
//! replica that cannot take the lock skips the tick.

use chrono::{DateTime, Utc};
use hangar_core::persistence::Persistence;
use hangar_core::retry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ticker::spawn_periodic;

/// Advisory lock guarding resubmission across replicas.
pub const PENDING_JOBS_LOCK: &str = "hangar:pending_jobs";

/// Configuration for the resubmission task.
#[derive(Debug, Clone)]
pub struct ResubmissionConfig {
    /// How often to look for due jobs.
    pub poll_interval: Duration,
}

impl Default for ResubmissionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Resubmits PENDING jobs whose backoff has elapsed.
pub struct ResubmissionTask {
    persistence: Arc<dyn Persistence>,
    config: ResubmissionConfig,
}

impl ResubmissionTask {
    /// Create a new resubmission task.
    pub fn new(persistence: Arc<dyn Persistence>, config: ResubmissionConfig) -> Self {
        Self {
            persistence,
            config,
        }
    }

    /// Run every poll interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.poll_interval;
        spawn_periodic("resubmission", interval, cancel, move || {
            let task = self.clone();
            async move { task.run_once().await.map(|_| ()) }
        })
    }

    /// One resubmission pass. Returns the number of jobs resubmitted.
    pub async fn run_once(&self) -> Result<usize> {
        self.run_once_at(Utc::now()).await
    }

    /// One resubmission pass judging backoffs as of `now`.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let locker = self.persistence.advisory_locker();
        let Some(guard) = locker.try_lock(PENDING_JOBS_LOCK).await? else {
            debug!("Another replica is resubmitting pending jobs, skipping");
            return Ok(0);
        };

        let result = self.resubmit_due(now).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release pending jobs lock");
        }
        result
    }

    async fn resubmit_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut resubmitted = 0;
        for job in self.persistence.list_pending_jobs().await? {
            if !retry::is_due_for_resubmission(&job, now) {
                continue;
            }
            if self.persistence.resubmit_job(job.id).await? {
                info!(
                    job_id = %job.id,
                    job_name = %job.job_name(),
                    submission_num = job.submission_num + 1,
                    "Job resubmitted"
                );
                resubmitted += 1;
            }
        }
        Ok(resubmitted)
    }
}
