// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compute trait definitions.
//!
//! Defines the interface every cloud or on-prem backend implements. The core
//! only ever talks to backends through [`Compute`].

use async_trait::async_trait;
use hangar_core::models::{
    BackendType, Gateway, GatewayProvisioningData, InstanceOffer, Job, JobProvisioningData,
    PlacementGroup, Requirements, Run, SshConnectionParams, Volume, VolumeProvisioningData,
};
use thiserror::Error;

/// Errors from backend operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The backend has no capacity for the request right now.
    #[error("No capacity: {0}")]
    NoCapacity(String),

    /// Authentication with the backend failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The stored backend credentials are invalid.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The referenced cloud resource does not exist.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The placement group still has instances in it.
    #[error("Placement group in use: {0}")]
    PlacementGroupInUse(String),

    /// The backend does not implement this operation.
    #[error("Not supported by this backend: {0}")]
    NotSupported(&'static str),

    /// Other backend failure.
    #[error("Backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// True for errors the backend owner has to fix (credentials, auth).
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::InvalidCredentials(_))
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Why a launch attempt did not produce an instance.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// No capacity for this offer; try the next one.
    #[error("No capacity: {0}")]
    NoCapacity(String),

    /// Backend failed in an expected way; try the next one.
    #[error(transparent)]
    Transient(BackendError),

    /// Unexpected failure; stop and fail the job.
    #[error("Fatal provisioning error: {0}")]
    Fatal(String),
}

impl From<BackendError> for ProvisionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NoCapacity(msg) => Self::NoCapacity(msg),
            other => Self::Transient(other),
        }
    }
}

/// What a backend reports after launching an instance for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchedInstanceInfo {
    /// Backend-side instance identifier.
    pub instance_id: String,
    /// Public address, if already known.
    pub ip_address: Option<String>,
    /// Region the instance was placed in.
    pub region: String,
    /// SSH user.
    pub username: String,
    /// SSH port.
    pub ssh_port: u16,
    /// Whether the job runs inside a container on the host.
    pub dockerized: bool,
    /// Jump host, for backends behind a proxy.
    pub ssh_proxy: Option<SshConnectionParams>,
    /// Opaque backend data (spot request id, zone, ...).
    pub backend_data: Option<String>,
}

/// Observed state of a launched instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Still booting.
    Provisioning,
    /// Up and reachable.
    Running,
    /// Terminated, preempted or otherwise lost.
    Gone,
}

/// A compute backend.
///
/// Lifecycle calls must be idempotent: acting on an already-gone resource
/// succeeds or returns [`BackendError::ResourceNotFound`].
#[async_trait]
pub trait Compute: Send + Sync {
    /// Which backend kind this is.
    fn backend_type(&self) -> BackendType;

    /// Offers matching `requirements`, annotated with availability.
    async fn get_offers(&self, requirements: &Requirements) -> Result<Vec<InstanceOffer>>;

    /// Launch an instance for `job` using `offer`.
    async fn run_job(
        &self,
        run: &Run,
        job: &Job,
        offer: &InstanceOffer,
        ssh_public_key: &str,
        ssh_private_key: &str,
    ) -> std::result::Result<LaunchedInstanceInfo, ProvisionError>;

    /// Terminate an instance.
    async fn terminate_instance(
        &self,
        instance_id: &str,
        region: &str,
        backend_data: Option<&str>,
    ) -> Result<()>;

    /// Current state of the instance a job was placed on.
    async fn instance_state(&self, provisioning: &JobProvisioningData) -> Result<InstanceState>;

    /// Create a gateway instance.
    async fn create_gateway(&self, _gateway: &Gateway) -> Result<GatewayProvisioningData> {
        Err(BackendError::NotSupported("create_gateway"))
    }

    /// Terminate a gateway instance.
    async fn terminate_gateway(
        &self,
        _instance_id: &str,
        _region: &str,
        _backend_data: Option<&str>,
    ) -> Result<()> {
        Err(BackendError::NotSupported("terminate_gateway"))
    }

    /// Delete a placement group.
    async fn delete_placement_group(&self, _group: &PlacementGroup) -> Result<()> {
        Err(BackendError::NotSupported("delete_placement_group"))
    }

    /// Create a new volume.
    async fn create_volume(&self, _volume: &Volume) -> Result<VolumeProvisioningData> {
        Err(BackendError::NotSupported("create_volume"))
    }

    /// Look up an existing volume by its external id.
    async fn register_volume(&self, _volume: &Volume) -> Result<VolumeProvisioningData> {
        Err(BackendError::NotSupported("register_volume"))
    }

    /// Delete a volume.
    async fn delete_volume(&self, _volume: &Volume) -> Result<()> {
        Err(BackendError::NotSupported("delete_volume"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_into_provision_error() {
        let err: ProvisionError = BackendError::NoCapacity("us-east-1".into()).into();
        assert!(matches!(err, ProvisionError::NoCapacity(_)));

        let err: ProvisionError = BackendError::Auth("expired token".into()).into();
        assert!(matches!(err, ProvisionError::Transient(BackendError::Auth(_))));
    }

    #[test]
    fn test_config_errors() {
        assert!(BackendError::Auth("x".into()).is_config_error());
        assert!(BackendError::InvalidCredentials("x".into()).is_config_error());
        assert!(!BackendError::NoCapacity("x".into()).is_config_error());
        assert!(!BackendError::Other("x".into()).is_config_error());
    }
}
