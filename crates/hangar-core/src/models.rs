// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types shared by the scheduler, the pipelines and the persistence layer.
//!
//! Status enums are stored as lowercase text columns; use `as_str()` / `FromStr`
//! for the database form.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Defines a unit enum with a stable lowercase string form.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $s:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $s)] $variant ),+
        }

        impl $name {
            /// Stable string form used in storage and logs.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $s ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $s => Ok(Self::$variant), )+
                    other => Err(CoreError::Validation {
                        field: stringify!($name).to_string(),
                        message: format!("unknown value '{other}'"),
                    }),
                }
            }
        }
    };
}

// ============================================================================
// Backends and offers
// ============================================================================

string_enum! {
    /// Compute backend kinds known to the control plane.
    pub enum BackendType {
        /// Amazon Web Services.
        Aws => "aws",
        /// Microsoft Azure.
        Azure => "azure",
        /// Google Cloud Platform.
        Gcp => "gcp",
        /// Any Kubernetes cluster.
        Kubernetes => "kubernetes",
        /// Lambda Cloud.
        Lambda => "lambda",
        /// RunPod.
        Runpod => "runpod",
        /// Vast.ai.
        Vastai => "vastai",
        /// TensorDock.
        Tensordock => "tensordock",
        /// Oracle Cloud Infrastructure.
        Oci => "oci",
        /// Cudo Compute.
        Cudo => "cudo",
        /// DataCrunch.
        Datacrunch => "datacrunch",
        /// Nebius.
        Nebius => "nebius",
        /// Vultr.
        Vultr => "vultr",
        /// The host the control plane runs on.
        Local => "local",
    }
}

string_enum! {
    /// Live availability reported by a backend for an offer.
    pub enum InstanceAvailability {
        /// Backend did not check.
        Unknown => "unknown",
        /// Capacity is currently obtainable.
        Available => "available",
        /// Capacity is currently exhausted.
        NotAvailable => "not_available",
        /// The account has no quota for this instance type.
        NoQuota => "no_quota",
    }
}

impl InstanceAvailability {
    /// Whether the offer may be attempted when unavailable offers are excluded.
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::NotAvailable | Self::NoQuota)
    }
}

/// A single accelerator attached to an instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gpu {
    /// Model name, e.g. `A100`.
    pub name: String,
    /// On-board memory.
    pub memory_mib: u64,
}

/// Hardware shape of an instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// Virtual CPUs.
    pub cpus: u32,
    /// RAM.
    pub memory_mib: u64,
    /// Attached accelerators.
    #[serde(default)]
    pub gpus: Vec<Gpu>,
    /// Whether this is interruptible (spot) capacity.
    #[serde(default)]
    pub spot: bool,
}

/// A named instance type with its resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    /// Backend-specific name, e.g. `p4d.24xlarge`.
    pub name: String,
    /// Hardware shape.
    pub resources: Resources,
}

/// A priced, region-scoped instance type advertised by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceOffer {
    /// Backend that advertised the offer.
    pub backend: BackendType,
    /// The instance type.
    pub instance: InstanceType,
    /// Region (or zone, for backends without regions).
    pub region: String,
    /// USD per hour.
    pub price: f64,
    /// Live availability, when the backend checked.
    pub availability: InstanceAvailability,
}

/// GPU constraints of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuRequirements {
    /// Minimum number of GPUs.
    #[serde(default)]
    pub count_min: Option<u32>,
    /// Accepted GPU model names (case-insensitive).
    #[serde(default)]
    pub names: Option<Vec<String>>,
    /// Minimum memory per GPU.
    #[serde(default)]
    pub memory_min_mib: Option<u64>,
}

/// Constraints a job places on acceptable offers. Unset fields impose no filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Minimum vCPUs.
    #[serde(default)]
    pub cpu_min: Option<u32>,
    /// Minimum RAM.
    #[serde(default)]
    pub memory_min_mib: Option<u64>,
    /// GPU constraints.
    #[serde(default)]
    pub gpu: Option<GpuRequirements>,
    /// `Some(true)` for spot only, `Some(false)` for on-demand only.
    #[serde(default)]
    pub spot: Option<bool>,
    /// Maximum USD per hour.
    #[serde(default)]
    pub max_price: Option<f64>,
}

impl Requirements {
    /// Returns true if `offer` violates none of the specified constraints.
    pub fn satisfied_by(&self, offer: &InstanceOffer) -> bool {
        let resources = &offer.instance.resources;

        if self.cpu_min.is_some_and(|min| resources.cpus < min) {
            return false;
        }
        if self
            .memory_min_mib
            .is_some_and(|min| resources.memory_mib < min)
        {
            return false;
        }
        if self.spot.is_some_and(|spot| resources.spot != spot) {
            return false;
        }
        if self.max_price.is_some_and(|max| offer.price > max) {
            return false;
        }

        if let Some(gpu) = &self.gpu {
            // GPUs that fail the per-device constraints do not count.
            let matching = resources
                .gpus
                .iter()
                .filter(|g| {
                    gpu.names.as_ref().is_none_or(|names| {
                        names.iter().any(|n| n.eq_ignore_ascii_case(&g.name))
                    })
                })
                .filter(|g| gpu.memory_min_mib.is_none_or(|min| g.memory_mib >= min))
                .count() as u32;

            let count_min = gpu.count_min.unwrap_or(
                if gpu.names.is_some() || gpu.memory_min_mib.is_some() {
                    1
                } else {
                    0
                },
            );
            if matching < count_min {
                return false;
            }
        }

        true
    }
}

// ============================================================================
// Projects and runs
// ============================================================================

/// A project owns backends, runs and managed resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique project name.
    pub name: String,
    /// Public key installed on provisioned instances.
    pub ssh_public_key: String,
    /// Private key the control plane uses to reach instances.
    pub ssh_private_key: String,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
}

/// Backend configuration attached to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Owning project.
    pub project_name: String,
    /// Kind of backend.
    pub backend_type: BackendType,
    /// Backend-specific settings and credentials.
    pub config: serde_json::Value,
}

/// A submitted run; jobs belong to runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run ID.
    pub id: Uuid,
    /// Owning project.
    pub project_name: String,
    /// Human-readable run name, unique per project.
    pub run_name: String,
    /// User who submitted the run.
    pub user_name: String,
    /// When the run was submitted.
    pub submitted_at: DateTime<Utc>,
}

// ============================================================================
// Jobs
// ============================================================================

string_enum! {
    /// Job lifecycle states.
    pub enum JobStatus {
        /// Waiting for the scheduler.
        Submitted => "submitted",
        /// An instance was launched and is booting.
        Provisioning => "provisioning",
        /// The instance is pulling the job image.
        Pulling => "pulling",
        /// The job is executing.
        Running => "running",
        /// Termination was requested; the monitor will clean up.
        Terminating => "terminating",
        /// Stopped on request.
        Terminated => "terminated",
        /// Finished successfully.
        Done => "done",
        /// Finished with an error.
        Failed => "failed",
        /// Waiting for a resubmission backoff to elapse.
        Pending => "pending",
    }
}

impl JobStatus {
    /// Terminal states are never left.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Terminated | Self::Done | Self::Failed)
    }

    /// States in which the job holds an instance.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Provisioning | Self::Pulling | Self::Running | Self::Terminating
        )
    }
}

string_enum! {
    /// Why a job left (or is leaving) the active states.
    pub enum JobTerminationReason {
        /// The project has no usable backend.
        NoBackendAvailable => "no_backend_available",
        /// The instance never became reachable.
        FailedToStart => "failed_to_start",
        /// The instance disappeared while the job was active.
        InstanceUnreachable => "instance_unreachable",
        /// Spot capacity was reclaimed by the provider.
        InterruptedByNoCapacity => "interrupted_by_no_capacity",
        /// The user stopped the job.
        TerminatedByUser => "terminated_by_user",
        /// The control plane stopped the job.
        TerminatedByServer => "terminated_by_server",
        /// The job exited successfully.
        DoneByRunner => "done_by_runner",
        /// The job's process failed.
        ContainerExitedWithError => "container_exited_with_error",
    }
}

impl JobTerminationReason {
    /// Final status a job reaches once termination completes.
    pub fn to_status(&self) -> JobStatus {
        match self {
            Self::TerminatedByUser | Self::TerminatedByServer => JobStatus::Terminated,
            Self::DoneByRunner => JobStatus::Done,
            _ => JobStatus::Failed,
        }
    }
}

/// Duration-bounded retry policy of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Whether failed starts and lost instances are retried at all.
    pub retry: bool,
    /// Retry budget in seconds, counted from job creation.
    pub duration: u64,
}

impl RetryPolicy {
    /// Budget as a chrono duration.
    pub fn budget(&self) -> Duration {
        Duration::try_seconds(i64::try_from(self.duration).unwrap_or(i64::MAX)).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry: false,
            duration: crate::retry::DEFAULT_RETRY_DURATION_SECS,
        }
    }
}

/// An SSH hop used to reach instances behind a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshConnectionParams {
    /// Proxy hostname.
    pub hostname: String,
    /// Proxy user.
    pub username: String,
    /// Proxy port.
    pub port: u16,
}

/// Where and how a job's instance was provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProvisioningData {
    /// Backend that launched the instance.
    pub backend: BackendType,
    /// Instance type that was launched.
    pub instance_type: InstanceType,
    /// Backend-assigned instance identifier.
    pub instance_id: String,
    /// Reachable address; may be unknown while booting.
    pub hostname: Option<String>,
    /// Region of the instance.
    pub region: String,
    /// USD per hour.
    pub price: f64,
    /// SSH user.
    pub username: String,
    /// SSH port.
    pub ssh_port: u16,
    /// Whether the job runs inside a container on the instance.
    pub dockerized: bool,
    /// Optional SSH proxy hop.
    pub ssh_proxy: Option<SshConnectionParams>,
    /// Backend-private data (spot request id and the like).
    pub backend_data: Option<String>,
}

/// A single provisioning attempt of a run's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: Uuid,
    /// Owning run.
    pub run_id: Uuid,
    /// Owning project.
    pub project_name: String,
    /// Name of the owning run.
    pub run_name: String,
    /// Replica index within the run.
    pub job_num: i32,
    /// How many times the job was resubmitted.
    pub submission_num: i32,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Why the job stopped, once known.
    pub termination_reason: Option<JobTerminationReason>,
    /// Human-readable detail for the termination reason.
    pub termination_message: Option<String>,
    /// Offer constraints.
    pub requirements: Requirements,
    /// Retry policy, if any.
    pub retry_policy: Option<RetryPolicy>,
    /// Set once an instance is launched.
    pub job_provisioning_data: Option<JobProvisioningData>,
    /// Fleet the job's instance belongs to.
    pub fleet_id: Option<Uuid>,
    /// Row in `instances` backing the job.
    pub instance_id: Option<Uuid>,
    /// Soft-delete flag.
    pub deleted: bool,
    /// When the job was created. The retry budget is measured from here.
    pub created_at: DateTime<Utc>,
    /// When the current submission was made.
    pub submitted_at: DateTime<Utc>,
    /// Last time a worker finished processing the job.
    pub last_processed_at: DateTime<Utc>,
    /// Lease token held by a worker.
    pub lock_token: Option<Uuid>,
    /// Lease deadline.
    pub lock_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a fresh SUBMITTED job for `run`.
    pub fn new(run: &Run, job_num: i32, requirements: Requirements) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id: run.id,
            project_name: run.project_name.clone(),
            run_name: run.run_name.clone(),
            job_num,
            submission_num: 0,
            status: JobStatus::Submitted,
            termination_reason: None,
            termination_message: None,
            requirements,
            retry_policy: None,
            job_provisioning_data: None,
            fleet_id: None,
            instance_id: None,
            deleted: false,
            created_at: now,
            submitted_at: now,
            last_processed_at: now,
            lock_token: None,
            lock_expires_at: None,
        }
    }

    /// Name used for the job's instance.
    pub fn job_name(&self) -> String {
        format!("{}-{}-{}", self.run_name, self.job_num, self.submission_num)
    }
}

// ============================================================================
// Managed resources
// ============================================================================

string_enum! {
    /// Pipeline-managed resource kinds. The string form is the table name.
    pub enum ResourceKind {
        /// Fleets of instances.
        Fleet => "fleets",
        /// Gateways.
        Gateway => "gateways",
        /// Placement groups.
        PlacementGroup => "placement_groups",
        /// Volumes.
        Volume => "volumes",
    }
}

impl ResourceKind {
    /// All pipeline-managed kinds.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Fleet,
        ResourceKind::Gateway,
        ResourceKind::PlacementGroup,
        ResourceKind::Volume,
    ];

    /// Table backing this kind.
    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }
}

/// Lease fields common to every pipeline-managed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseState {
    /// Soft-delete flag. Deleted rows are never claimed.
    pub deleted: bool,
    /// Last time a worker finished processing the row.
    pub last_processed_at: DateTime<Utc>,
    /// Lease token held by a worker.
    pub lock_token: Option<Uuid>,
    /// Lease deadline.
    pub lock_expires_at: Option<DateTime<Utc>>,
}

impl LeaseState {
    /// Unclaimed, not deleted, last processed now.
    pub fn new() -> Self {
        Self {
            deleted: false,
            last_processed_at: Utc::now(),
            lock_token: None,
            lock_expires_at: None,
        }
    }

    /// Whether a worker may claim the row at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        !self.deleted
            && match (self.lock_token, self.lock_expires_at) {
                (None, _) => true,
                (Some(_), Some(expires)) => expires < now,
                (Some(_), None) => true,
            }
    }
}

impl Default for LeaseState {
    fn default() -> Self {
        Self::new()
    }
}

/// Transient view of a claimed managed resource.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineItem {
    /// Kind (and table) of the claimed row.
    pub kind: ResourceKind,
    /// Row ID.
    pub id: Uuid,
    /// Token that proves ownership of the lease.
    pub lock_token: Uuid,
    /// Lease deadline.
    pub lock_expires_at: DateTime<Utc>,
    /// Whether the row was taken over from another worker's stale lease.
    pub prev_lock_expired: bool,
}

impl PipelineItem {
    /// Table the item lives in.
    pub fn table_name(&self) -> &'static str {
        self.kind.table_name()
    }
}

string_enum! {
    /// Fleet lifecycle states.
    pub enum FleetStatus {
        /// In use.
        Active => "active",
        /// Deletion requested; instances are being terminated.
        Terminating => "terminating",
        /// All instances gone.
        Terminated => "terminated",
    }
}

/// A group of instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fleet {
    /// Unique fleet ID.
    pub id: Uuid,
    /// Owning project.
    pub project_name: String,
    /// Fleet name.
    pub name: String,
    /// Lifecycle state.
    pub status: FleetStatus,
    /// Created implicitly for a run rather than by a user.
    pub autocreated: bool,
    /// When the fleet was created.
    pub created_at: DateTime<Utc>,
    /// Lease fields.
    pub lease: LeaseState,
}

impl Fleet {
    /// New active fleet.
    pub fn new(project_name: &str, name: &str, autocreated: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_name: project_name.to_string(),
            name: name.to_string(),
            status: FleetStatus::Active,
            autocreated,
            created_at: Utc::now(),
            lease: LeaseState::new(),
        }
    }
}

string_enum! {
    /// Instance lifecycle states.
    pub enum InstanceStatus {
        /// Launched, booting.
        Provisioning => "provisioning",
        /// Reachable.
        Running => "running",
        /// Termination requested.
        Terminating => "terminating",
        /// Gone.
        Terminated => "terminated",
    }
}

impl InstanceStatus {
    /// Whether the instance still counts toward its fleet.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Terminated)
    }
}

/// A compute instance launched on a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique row ID.
    pub id: Uuid,
    /// Fleet the instance belongs to.
    pub fleet_id: Option<Uuid>,
    /// Owning project.
    pub project_name: String,
    /// Instance name.
    pub name: String,
    /// Backend that launched it.
    pub backend: BackendType,
    /// Region.
    pub region: String,
    /// Backend-assigned instance identifier.
    pub instance_id: String,
    /// Backend-private data.
    pub backend_data: Option<String>,
    /// USD per hour.
    pub price: f64,
    /// Lifecycle state.
    pub status: InstanceStatus,
    /// Job occupying the instance.
    pub job_id: Option<Uuid>,
    /// Soft-delete flag.
    pub deleted: bool,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

string_enum! {
    /// Gateway lifecycle states.
    pub enum GatewayStatus {
        /// Waiting for provisioning.
        Submitted => "submitted",
        /// Being created.
        Provisioning => "provisioning",
        /// Serving.
        Running => "running",
        /// Creation failed.
        Failed => "failed",
    }
}

/// Result of creating a gateway on a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayProvisioningData {
    /// Backend-assigned instance identifier.
    pub instance_id: String,
    /// Public IP address.
    pub ip_address: String,
    /// Region.
    pub region: String,
    /// Availability zone, if the backend has them.
    pub availability_zone: Option<String>,
    /// Backend-private data.
    pub backend_data: Option<String>,
}

/// A gateway proxying traffic into a project's services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    /// Unique gateway ID.
    pub id: Uuid,
    /// Owning project.
    pub project_name: String,
    /// Gateway name.
    pub name: String,
    /// Backend to create the gateway on.
    pub backend: BackendType,
    /// Region.
    pub region: String,
    /// Lifecycle state.
    pub status: GatewayStatus,
    /// Human-readable detail for the status.
    pub status_message: Option<String>,
    /// Set once created.
    pub provisioning_data: Option<GatewayProvisioningData>,
    /// Deletion requested.
    pub to_be_deleted: bool,
    /// When the gateway was created.
    pub created_at: DateTime<Utc>,
    /// Lease fields.
    pub lease: LeaseState,
}

impl Gateway {
    /// New submitted gateway.
    pub fn new(project_name: &str, name: &str, backend: BackendType, region: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_name: project_name.to_string(),
            name: name.to_string(),
            backend,
            region: region.to_string(),
            status: GatewayStatus::Submitted,
            status_message: None,
            provisioning_data: None,
            to_be_deleted: false,
            created_at: Utc::now(),
            lease: LeaseState::new(),
        }
    }
}

/// A placement group backing a fleet's cluster networking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementGroup {
    /// Unique row ID.
    pub id: Uuid,
    /// Owning project.
    pub project_name: String,
    /// Placement group name.
    pub name: String,
    /// Fleet the group belongs to.
    pub fleet_id: Uuid,
    /// Backend holding the group.
    pub backend: BackendType,
    /// Region.
    pub region: String,
    /// Backend-private data.
    pub backend_data: Option<String>,
    /// Deletion requested.
    pub to_be_deleted: bool,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// Lease fields.
    pub lease: LeaseState,
}

impl PlacementGroup {
    /// New placement group for `fleet`.
    pub fn new(fleet: &Fleet, name: &str, backend: BackendType, region: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_name: fleet.project_name.clone(),
            name: name.to_string(),
            fleet_id: fleet.id,
            backend,
            region: region.to_string(),
            backend_data: None,
            to_be_deleted: false,
            created_at: Utc::now(),
            lease: LeaseState::new(),
        }
    }
}

string_enum! {
    /// Volume lifecycle states.
    pub enum VolumeStatus {
        /// Waiting for provisioning.
        Submitted => "submitted",
        /// Being created.
        Provisioning => "provisioning",
        /// Ready to attach.
        Active => "active",
        /// Creation failed.
        Failed => "failed",
    }
}

/// Result of creating or registering a volume on a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeProvisioningData {
    /// Backend-assigned volume identifier.
    pub volume_id: String,
    /// Size in GB.
    pub size_gb: u32,
    /// Availability zone, if the backend has them.
    pub availability_zone: Option<String>,
    /// USD per month, when known.
    pub price: Option<f64>,
    /// Backend-private data.
    pub backend_data: Option<String>,
}

/// A network volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Unique row ID.
    pub id: Uuid,
    /// Owning project.
    pub project_name: String,
    /// Volume name.
    pub name: String,
    /// Backend holding the volume.
    pub backend: BackendType,
    /// Region.
    pub region: String,
    /// Requested size for new volumes.
    pub size_gb: Option<u32>,
    /// Existing backend volume to register instead of creating one.
    pub external_volume_id: Option<String>,
    /// Lifecycle state.
    pub status: VolumeStatus,
    /// Human-readable detail for the status.
    pub status_message: Option<String>,
    /// Set once created or registered.
    pub provisioning_data: Option<VolumeProvisioningData>,
    /// Deletion requested.
    pub to_be_deleted: bool,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// Lease fields.
    pub lease: LeaseState,
}

impl Volume {
    /// New submitted volume.
    pub fn new(project_name: &str, name: &str, backend: BackendType, region: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_name: project_name.to_string(),
            name: name.to_string(),
            backend,
            region: region.to_string(),
            size_gb: None,
            external_volume_id: None,
            status: VolumeStatus::Submitted,
            status_message: None,
            provisioning_data: None,
            to_be_deleted: false,
            created_at: Utc::now(),
            lease: LeaseState::new(),
        }
    }

    /// Whether the volume was registered rather than created.
    pub fn is_external(&self) -> bool {
        self.external_volume_id.is_some()
    }
}
