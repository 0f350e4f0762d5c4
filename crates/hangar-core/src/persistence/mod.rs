// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for hangar-core.
//!
//! The [`Persistence`] trait is the only way the scheduler and the pipelines
//! touch stored state. Every claim and release is a single atomic operation
//! conditioned on the lease token, so multiple replicas can share a database.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryPersistence;
pub use self::postgres::PostgresPersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::locking::AdvisoryLocker;
use crate::models::{
    BackendConfig, Fleet, FleetStatus, Gateway, GatewayProvisioningData, GatewayStatus, Instance,
    InstanceStatus, Job, JobProvisioningData, JobStatus, JobTerminationReason, PipelineItem,
    PlacementGroup, Project, ResourceKind, Run, Volume, VolumeProvisioningData, VolumeStatus,
};

// ============================================================================
// Request / update types
// ============================================================================

/// Parameters of a lease claim.
#[derive(Debug, Clone)]
pub struct Claim<'a> {
    /// Token written to claimed rows.
    pub lock_token: Uuid,
    /// Lease deadline written to claimed rows.
    pub lock_expires_at: DateTime<Utc>,
    /// Rows this process is already working on.
    pub exclude: &'a [Uuid],
    /// Only rows with `last_processed_at <= processed_before` are eligible.
    pub processed_before: DateTime<Utc>,
}

impl<'a> Claim<'a> {
    /// A fresh token with a lease of `lease` from now.
    pub fn new(lease: std::time::Duration, exclude: &'a [Uuid]) -> Self {
        let now = Utc::now();
        Self {
            lock_token: Uuid::new_v4(),
            lock_expires_at: now + to_chrono(lease),
            exclude,
            processed_before: now,
        }
    }

    /// Skip rows processed less than `interval` ago.
    pub fn min_processing_interval(mut self, interval: std::time::Duration) -> Self {
        self.processed_before = Utc::now() - to_chrono(interval);
        self
    }
}

/// Converts a std duration, clamping to one day.
pub fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d)
        .unwrap_or(chrono::Duration::days(1))
        .min(chrono::Duration::days(1))
}

/// Changes applied to a job together with releasing its lease.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    /// New status.
    pub status: Option<JobStatus>,
    /// New termination reason.
    pub termination_reason: Option<JobTerminationReason>,
    /// New termination message.
    pub termination_message: Option<String>,
    /// Drop provisioning data and the instance link (resubmission).
    pub clear_provisioning: bool,
    /// New status for the job's instance row, if it has one.
    pub instance_status: Option<InstanceStatus>,
}

impl JobUpdate {
    /// Move to `status` and nothing else.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Fail with `reason` and a human-readable message.
    pub fn failed(reason: JobTerminationReason, message: impl Into<String>) -> Self {
        Self {
            status: Some(reason.to_status()),
            termination_reason: Some(reason),
            termination_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Result of a successful launch, stored atomically with the job's release.
#[derive(Debug, Clone)]
pub struct JobProvisioned {
    /// Where the job landed.
    pub provisioning_data: JobProvisioningData,
    /// Row for the launched instance.
    pub instance: Instance,
    /// Fleet to create for the instance, when the job had none.
    pub new_fleet: Option<Fleet>,
}

/// Fleet changes applied on release.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetUpdate {
    /// New status.
    pub status: Option<FleetStatus>,
    /// Soft-delete the row.
    pub deleted: bool,
}

/// Gateway changes applied on release.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayUpdate {
    /// New status.
    pub status: Option<GatewayStatus>,
    /// New status message.
    pub status_message: Option<String>,
    /// Provisioning result.
    pub provisioning_data: Option<GatewayProvisioningData>,
    /// Soft-delete the row.
    pub deleted: bool,
}

/// Placement group changes applied on release.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementGroupUpdate {
    /// Soft-delete the row.
    pub deleted: bool,
}

/// Volume changes applied on release.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeUpdate {
    /// New status.
    pub status: Option<VolumeStatus>,
    /// New status message.
    pub status_message: Option<String>,
    /// Provisioning result.
    pub provisioning_data: Option<VolumeProvisioningData>,
    /// Soft-delete the row.
    pub deleted: bool,
}

/// Kind-specific changes a pipeline processor wants committed with the release.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceUpdate {
    /// For [`ResourceKind::Fleet`].
    Fleet(FleetUpdate),
    /// For [`ResourceKind::Gateway`].
    Gateway(GatewayUpdate),
    /// For [`ResourceKind::PlacementGroup`].
    PlacementGroup(PlacementGroupUpdate),
    /// For [`ResourceKind::Volume`].
    Volume(VolumeUpdate),
}

impl ResourceUpdate {
    /// Kind this update applies to.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Fleet(_) => ResourceKind::Fleet,
            Self::Gateway(_) => ResourceKind::Gateway,
            Self::PlacementGroup(_) => ResourceKind::PlacementGroup,
            Self::Volume(_) => ResourceKind::Volume,
        }
    }

    pub(crate) fn check_kind(&self, item: &PipelineItem) -> Result<(), CoreError> {
        if self.kind() != item.kind {
            return Err(CoreError::Validation {
                field: "update".to_string(),
                message: format!(
                    "{} update cannot be applied to {} item {}",
                    self.kind(),
                    item.kind,
                    item.id
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Persistence trait
// ============================================================================

/// Durable storage for projects, jobs and managed resources.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Cross-replica advisory locks backed by this store.
    fn advisory_locker(&self) -> AdvisoryLocker;

    // ---- projects -------------------------------------------------------

    /// Insert a project.
    async fn create_project(&self, project: &Project) -> Result<(), CoreError>;

    /// Fetch a project by name.
    async fn get_project(&self, name: &str) -> Result<Option<Project>, CoreError>;

    /// Insert or replace the config of one backend type for a project.
    async fn set_project_backend(&self, backend: &BackendConfig) -> Result<(), CoreError>;

    /// Backends configured for a project.
    async fn list_project_backends(
        &self,
        project_name: &str,
    ) -> Result<Vec<BackendConfig>, CoreError>;

    // ---- runs and jobs --------------------------------------------------

    /// Insert a run.
    async fn create_run(&self, run: &Run) -> Result<(), CoreError>;

    /// Fetch a run.
    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, CoreError>;

    /// Insert a job.
    async fn create_job(&self, job: &Job) -> Result<(), CoreError>;

    /// Fetch a job.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, CoreError>;

    /// Claim the least recently processed unlocked job in one of `statuses`.
    async fn claim_job(
        &self,
        statuses: &[JobStatus],
        claim: &Claim<'_>,
    ) -> Result<Option<Job>, CoreError>;

    /// Apply `update`, clear the lease and touch `last_processed_at`.
    ///
    /// Returns false (and changes nothing) if `lock_token` no longer owns the job.
    async fn release_job(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        update: &JobUpdate,
    ) -> Result<bool, CoreError>;

    /// Push the lease deadline of a job still owned by `lock_token`.
    ///
    /// Returns false if the token no longer owns the job.
    async fn extend_job_lease(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        lock_expires_at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Mark the job PROVISIONING, store the instance (and fleet), release the lease.
    ///
    /// Returns false (and changes nothing) if `lock_token` no longer owns the job.
    async fn record_job_provisioned(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        provisioned: &JobProvisioned,
    ) -> Result<bool, CoreError>;

    /// Ask for a job to stop.
    ///
    /// Jobs holding an instance go to TERMINATING for the monitor to clean up;
    /// SUBMITTED and PENDING jobs go straight to the reason's final status.
    /// Returns false if the job is already finished.
    async fn request_job_termination(
        &self,
        job_id: Uuid,
        reason: JobTerminationReason,
        message: Option<&str>,
    ) -> Result<bool, CoreError>;

    /// All PENDING jobs.
    async fn list_pending_jobs(&self) -> Result<Vec<Job>, CoreError>;

    /// PENDING -> SUBMITTED with a new submission number. False if not PENDING.
    async fn resubmit_job(&self, job_id: Uuid) -> Result<bool, CoreError>;

    // ---- instances ------------------------------------------------------

    /// Insert an instance.
    async fn create_instance(&self, instance: &Instance) -> Result<(), CoreError>;

    /// Fetch an instance row.
    async fn get_instance(&self, id: Uuid) -> Result<Option<Instance>, CoreError>;

    /// Non-deleted instances of a fleet.
    async fn list_fleet_instances(&self, fleet_id: Uuid) -> Result<Vec<Instance>, CoreError>;

    /// Set an instance's status.
    async fn set_instance_status(&self, id: Uuid, status: InstanceStatus)
    -> Result<(), CoreError>;

    // ---- managed resources ----------------------------------------------

    /// Insert a fleet.
    async fn create_fleet(&self, fleet: &Fleet) -> Result<(), CoreError>;

    /// Fetch a fleet, deleted or not.
    async fn get_fleet(&self, id: Uuid) -> Result<Option<Fleet>, CoreError>;

    /// Insert a gateway.
    async fn create_gateway(&self, gateway: &Gateway) -> Result<(), CoreError>;

    /// Fetch a gateway.
    async fn get_gateway(&self, id: Uuid) -> Result<Option<Gateway>, CoreError>;

    /// Insert a placement group.
    async fn create_placement_group(&self, group: &PlacementGroup) -> Result<(), CoreError>;

    /// Fetch a placement group.
    async fn get_placement_group(&self, id: Uuid) -> Result<Option<PlacementGroup>, CoreError>;

    /// Insert a volume.
    async fn create_volume(&self, volume: &Volume) -> Result<(), CoreError>;

    /// Fetch a volume.
    async fn get_volume(&self, id: Uuid) -> Result<Option<Volume>, CoreError>;

    /// Claim up to `limit` claimable rows of `kind`, oldest `last_processed_at` first.
    async fn claim_items(
        &self,
        kind: ResourceKind,
        claim: &Claim<'_>,
        limit: usize,
    ) -> Result<Vec<PipelineItem>, CoreError>;

    /// Claim a single row of `kind`.
    async fn claim_item(
        &self,
        kind: ResourceKind,
        claim: &Claim<'_>,
    ) -> Result<Option<PipelineItem>, CoreError> {
        Ok(self.claim_items(kind, claim, 1).await?.pop())
    }

    /// Push the lease deadline of `items` that are still owned by their tokens.
    ///
    /// Returns the items whose lease was extended.
    async fn extend_leases(
        &self,
        items: &[PipelineItem],
        lock_expires_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, CoreError>;

    /// Apply `update`, clear the lease and touch `last_processed_at`.
    ///
    /// Returns false (and changes nothing) if the item's token no longer owns the row.
    async fn release_item(
        &self,
        item: &PipelineItem,
        update: Option<&ResourceUpdate>,
    ) -> Result<bool, CoreError>;
}
