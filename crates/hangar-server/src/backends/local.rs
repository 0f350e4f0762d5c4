// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local backend.
//!
//! Runs jobs on the server host itself. It advertises a single free offer
//! shaped like the host and never loses its "instance".

use async_trait::async_trait;
use hangar_core::models::{
    BackendConfig, BackendType, InstanceAvailability, InstanceOffer, InstanceType, Job,
    JobProvisioningData, Requirements, Resources, Run,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::traits::*;

/// Host shape advertised by the local backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalComputeConfig {
    /// CPUs offered.
    pub cpus: u32,
    /// Memory offered, in MiB.
    pub memory_mib: u64,
    /// SSH user for the host.
    pub username: String,
    /// SSH port of the host.
    pub ssh_port: u16,
}

impl Default for LocalComputeConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self {
            cpus,
            memory_mib: 8 * 1024,
            username: std::env::var("USER").unwrap_or_else(|_| "root".to_string()),
            ssh_port: 22,
        }
    }
}

/// Backend that runs jobs on this host.
pub struct LocalCompute {
    config: LocalComputeConfig,
}

impl LocalCompute {
    /// Create a local backend with the given host shape.
    pub fn new(config: LocalComputeConfig) -> Self {
        Self { config }
    }

    /// Build from a project backend config; an empty object means host defaults.
    pub fn from_backend_config(config: &BackendConfig) -> Result<Self> {
        let parsed = if config.config.is_null() {
            LocalComputeConfig::default()
        } else {
            serde_json::from_value(config.config.clone()).map_err(|e| {
                BackendError::InvalidCredentials(format!("invalid local backend config: {e}"))
            })?
        };
        Ok(Self::new(parsed))
    }

    fn offer(&self) -> InstanceOffer {
        InstanceOffer {
            backend: BackendType::Local,
            instance: InstanceType {
                name: "local".to_string(),
                resources: Resources {
                    cpus: self.config.cpus,
                    memory_mib: self.config.memory_mib,
                    gpus: Vec::new(),
                    spot: false,
                },
            },
            region: "local".to_string(),
            price: 0.0,
            availability: InstanceAvailability::Available,
        }
    }
}

#[async_trait]
impl Compute for LocalCompute {
    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    async fn get_offers(&self, requirements: &Requirements) -> Result<Vec<InstanceOffer>> {
        let offer = self.offer();
        if requirements.satisfied_by(&offer) {
            Ok(vec![offer])
        } else {
            debug!(
                cpus = self.config.cpus,
                memory_mib = self.config.memory_mib,
                "Local host does not satisfy requirements"
            );
            Ok(Vec::new())
        }
    }

    async fn run_job(
        &self,
        _run: &Run,
        job: &Job,
        offer: &InstanceOffer,
        _ssh_public_key: &str,
        _ssh_private_key: &str,
    ) -> std::result::Result<LaunchedInstanceInfo, ProvisionError> {
        info!(job_id = %job.id, job_name = %job.job_name(), "Placing job on local host");
        Ok(LaunchedInstanceInfo {
            instance_id: format!("local-{}", job.id),
            ip_address: Some("127.0.0.1".to_string()),
            region: offer.region.clone(),
            username: self.config.username.clone(),
            ssh_port: self.config.ssh_port,
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
        debug!(instance_id = %instance_id, "Releasing local instance");
        Ok(())
    }

    async fn instance_state(&self, _provisioning: &JobProvisioningData) -> Result<InstanceState> {
        Ok(InstanceState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_offer_respects_requirements() {
        let local = LocalCompute::new(LocalComputeConfig {
            cpus: 8,
            memory_mib: 32 * 1024,
            username: "hangar".to_string(),
            ssh_port: 2222,
        });

        let offers = local.get_offers(&Requirements::default()).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].price, 0.0);
        assert_eq!(offers[0].instance.resources.cpus, 8);

        let too_big = Requirements {
            cpu_min: Some(64),
            ..Default::default()
        };
        assert!(local.get_offers(&too_big).await.unwrap().is_empty());
    }

    #[test]
    fn test_local_from_backend_config() {
        let config = BackendConfig {
            project_name: "main".to_string(),
            backend_type: BackendType::Local,
            config: serde_json::json!({ "cpus": 2, "ssh_port": 10022 }),
        };
        let local = LocalCompute::from_backend_config(&config).unwrap();
        assert_eq!(local.config.cpus, 2);
        assert_eq!(local.config.ssh_port, 10022);

        let bad = BackendConfig {
            config: serde_json::json!({ "cpus": "many" }),
            ..config
        };
        assert!(LocalCompute::from_backend_config(&bad).is_err());
    }
}
