// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock compute backend for testing.
//!
//! A backend that hands out configured offers and simulates instance
//! lifecycles in memory, recording every call it receives.

use async_trait::async_trait;
use hangar_core::models::{
    BackendType, Gateway, GatewayProvisioningData, InstanceAvailability, InstanceOffer,
    InstanceType, Job, JobProvisioningData, PlacementGroup, Requirements, Resources, Run, Volume,
    VolumeProvisioningData,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::traits::*;

/// What `run_job` does.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchBehavior {
    /// Launch an instance.
    Launch,
    /// Report no capacity.
    NoCapacity,
    /// Fail with a transient backend error.
    Error(String),
    /// Fail fatally.
    Fatal(String),
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    instances: HashMap<String, InstanceState>,
    launched_jobs: Vec<Uuid>,
    launch_attempts: Vec<String>,
    terminated_instances: Vec<String>,
    created_gateways: Vec<Uuid>,
    terminated_gateways: Vec<String>,
    deleted_placement_groups: Vec<Uuid>,
    created_volumes: Vec<Uuid>,
    registered_volumes: Vec<Uuid>,
    deleted_volumes: Vec<Uuid>,
}

/// Mock compute backend for testing.
pub struct MockCompute {
    backend_type: BackendType,
    offers: Vec<InstanceOffer>,
    /// If true, `get_offers` fails.
    pub fail_offers: bool,
    /// What `run_job` does.
    pub launch: LaunchBehavior,
    /// State newly launched instances start in.
    pub launched_state: InstanceState,
    /// If true, `instance_state` fails.
    pub fail_instance_state: bool,
    /// If true, `delete_placement_group` reports the group as in use.
    pub placement_group_in_use: bool,
    /// If set, gateway and volume lifecycle calls fail with this message.
    pub lifecycle_error: Option<String>,
    state: Mutex<MockState>,
}

impl MockCompute {
    /// Create a mock backend with no offers.
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            offers: Vec::new(),
            fail_offers: false,
            launch: LaunchBehavior::Launch,
            launched_state: InstanceState::Provisioning,
            fail_instance_state: false,
            placement_group_in_use: false,
            lifecycle_error: None,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Set the offers returned by `get_offers`.
    pub fn with_offers(mut self, offers: Vec<InstanceOffer>) -> Self {
        self.offers = offers;
        self
    }

    /// Set what `run_job` does.
    pub fn with_launch(mut self, launch: LaunchBehavior) -> Self {
        self.launch = launch;
        self
    }

    /// Create a mock backend whose `run_job` always reports no capacity.
    pub fn no_capacity(backend_type: BackendType, offers: Vec<InstanceOffer>) -> Self {
        Self::new(backend_type)
            .with_offers(offers)
            .with_launch(LaunchBehavior::NoCapacity)
    }

    /// Build an available on-demand offer with 4 CPUs and 16 GiB of memory.
    pub fn offer(backend: BackendType, name: &str, price: f64) -> InstanceOffer {
        InstanceOffer {
            backend,
            instance: InstanceType {
                name: name.to_string(),
                resources: Resources {
                    cpus: 4,
                    memory_mib: 16 * 1024,
                    gpus: Vec::new(),
                    spot: false,
                },
            },
            region: "us-east-1".to_string(),
            price,
            availability: InstanceAvailability::Available,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Force the state of a launched instance.
    pub fn set_instance_state(&self, instance_id: &str, state: InstanceState) {
        self.state().instances.insert(instance_id.to_string(), state);
    }

    /// Jobs an instance was launched for.
    pub fn launched_jobs(&self) -> Vec<Uuid> {
        self.state().launched_jobs.clone()
    }

    /// Offer names `run_job` was called with, in call order.
    pub fn launch_attempts(&self) -> Vec<String> {
        self.state().launch_attempts.clone()
    }

    /// Instance ids passed to `terminate_instance`.
    pub fn terminated_instances(&self) -> Vec<String> {
        self.state().terminated_instances.clone()
    }

    /// Gateways created.
    pub fn created_gateways(&self) -> Vec<Uuid> {
        self.state().created_gateways.clone()
    }

    /// Gateway instance ids terminated.
    pub fn terminated_gateways(&self) -> Vec<String> {
        self.state().terminated_gateways.clone()
    }

    /// Placement groups deleted.
    pub fn deleted_placement_groups(&self) -> Vec<Uuid> {
        self.state().deleted_placement_groups.clone()
    }

    /// Volumes created.
    pub fn created_volumes(&self) -> Vec<Uuid> {
        self.state().created_volumes.clone()
    }

    /// External volumes registered.
    pub fn registered_volumes(&self) -> Vec<Uuid> {
        self.state().registered_volumes.clone()
    }

    /// Volumes deleted.
    pub fn deleted_volumes(&self) -> Vec<Uuid> {
        self.state().deleted_volumes.clone()
    }

    fn check_lifecycle(&self) -> Result<()> {
        match &self.lifecycle_error {
            Some(msg) => Err(BackendError::Other(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Compute for MockCompute {
    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    async fn get_offers(&self, _requirements: &Requirements) -> Result<Vec<InstanceOffer>> {
        if self.fail_offers {
            return Err(BackendError::Other("offer catalog unavailable".to_string()));
        }
        Ok(self.offers.clone())
    }

    async fn run_job(
        &self,
        _run: &Run,
        job: &Job,
        offer: &InstanceOffer,
        _ssh_public_key: &str,
        _ssh_private_key: &str,
    ) -> std::result::Result<LaunchedInstanceInfo, ProvisionError> {
        let mut state = self.state();
        state.launch_attempts.push(offer.instance.name.clone());

        match &self.launch {
            LaunchBehavior::Launch => {}
            LaunchBehavior::NoCapacity => {
                return Err(ProvisionError::NoCapacity(format!(
                    "{} sold out in {}",
                    offer.instance.name, offer.region
                )));
            }
            LaunchBehavior::Error(msg) => {
                return Err(BackendError::Other(msg.clone()).into());
            }
            LaunchBehavior::Fatal(msg) => return Err(ProvisionError::Fatal(msg.clone())),
        }

        state.next_id += 1;
        let instance_id = format!("{}-{}", self.backend_type, state.next_id);
        state
            .instances
            .insert(instance_id.clone(), self.launched_state);
        state.launched_jobs.push(job.id);

        Ok(LaunchedInstanceInfo {
            instance_id,
            ip_address: Some(format!("10.0.0.{}", state.next_id % 250)),
            region: offer.region.clone(),
            username: "ubuntu".to_string(),
            ssh_port: 22,
            dockerized: true,
            ssh_proxy: None,
            backend_data: None,
        })
    }

    async fn terminate_instance(
        &self,
        instance_id: &str,
        _region: &str,
        _backend_data: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state();
        state
            .instances
            .insert(instance_id.to_string(), InstanceState::Gone);
        state.terminated_instances.push(instance_id.to_string());
        Ok(())
    }

    async fn instance_state(&self, provisioning: &JobProvisioningData) -> Result<InstanceState> {
        if self.fail_instance_state {
            return Err(BackendError::Other("describe instances timed out".to_string()));
        }
        Ok(self
            .state()
            .instances
            .get(&provisioning.instance_id)
            .copied()
            .unwrap_or(InstanceState::Gone))
    }

    async fn create_gateway(&self, gateway: &Gateway) -> Result<GatewayProvisioningData> {
        self.check_lifecycle()?;
        let mut state = self.state();
        state.next_id += 1;
        state.created_gateways.push(gateway.id);
        Ok(GatewayProvisioningData {
            instance_id: format!("gw-{}", state.next_id),
            ip_address: format!("203.0.113.{}", state.next_id % 250),
            region: gateway.region.clone(),
            availability_zone: None,
            backend_data: None,
        })
    }

    async fn terminate_gateway(
        &self,
        instance_id: &str,
        _region: &str,
        _backend_data: Option<&str>,
    ) -> Result<()> {
        self.check_lifecycle()?;
        self.state()
            .terminated_gateways
            .push(instance_id.to_string());
        Ok(())
    }

    async fn delete_placement_group(&self, group: &PlacementGroup) -> Result<()> {
        if self.placement_group_in_use {
            return Err(BackendError::PlacementGroupInUse(group.name.clone()));
        }
        self.state().deleted_placement_groups.push(group.id);
        Ok(())
    }

    async fn create_volume(&self, volume: &Volume) -> Result<VolumeProvisioningData> {
        self.check_lifecycle()?;
        let mut state = self.state();
        state.next_id += 1;
        state.created_volumes.push(volume.id);
        Ok(VolumeProvisioningData {
            volume_id: format!("vol-{}", state.next_id),
            size_gb: volume.size_gb.unwrap_or(100),
            availability_zone: None,
            price: Some(0.08),
            backend_data: None,
        })
    }

    async fn register_volume(&self, volume: &Volume) -> Result<VolumeProvisioningData> {
        self.check_lifecycle()?;
        let volume_id = volume
            .external_volume_id
            .clone()
            .ok_or_else(|| BackendError::ResourceNotFound(volume.name.clone()))?;
        self.state().registered_volumes.push(volume.id);
        Ok(VolumeProvisioningData {
            volume_id,
            size_gb: volume.size_gb.unwrap_or(100),
            availability_zone: None,
            price: None,
            backend_data: None,
        })
    }

    async fn delete_volume(&self, volume: &Volume) -> Result<()> {
        self.check_lifecycle()?;
        self.state().deleted_volumes.push(volume.id);
        Ok(())
    }
}
