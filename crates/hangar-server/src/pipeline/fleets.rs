// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleet reconciliation.
//!
//! Deletes fleets that no longer hold active instances: autocreated fleets
//! once their jobs are gone, and fleets asked to terminate once their
//! instances are terminated.

use async_trait::async_trait;
use hangar_core::models::{FleetStatus, Instance, InstanceStatus, PipelineItem, ResourceKind};
use hangar_core::persistence::{FleetUpdate, Persistence, ResourceUpdate};
use std::sync::Arc;
use tracing::{info, warn};

use super::{PipelineHinter, PipelineProcessor};
use crate::backends::{BackendError, BackendRegistry};
use crate::error::Result;

/// Processor for the `fleets` pipeline.
pub struct FleetProcessor {
    persistence: Arc<dyn Persistence>,
    backends: Arc<BackendRegistry>,
    hinter: PipelineHinter,
}

impl FleetProcessor {
    /// Create a fleet processor.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        backends: Arc<BackendRegistry>,
        hinter: PipelineHinter,
    ) -> Self {
        Self {
            persistence,
            backends,
            hinter,
        }
    }

    /// Terminate one instance; true if it is gone afterwards.
    async fn terminate_instance(&self, instance: &Instance) -> Result<bool> {
        let backend = self
            .backends
            .get_backend(
                self.persistence.as_ref(),
                &instance.project_name,
                instance.backend,
            )
            .await?;

        match backend {
            Some(backend) => {
                match backend
                    .terminate_instance(
                        &instance.instance_id,
                        &instance.region,
                        instance.backend_data.as_deref(),
                    )
                    .await
                {
                    Ok(()) | Err(BackendError::ResourceNotFound(_)) => {}
                    Err(e) => {
                        warn!(
                            instance_id = %instance.instance_id,
                            fleet_id = ?instance.fleet_id,
                            error = %e,
                            "Failed to terminate fleet instance"
                        );
                        return Ok(false);
                    }
                }
            }
            None => {
                warn!(
                    instance_id = %instance.instance_id,
                    backend = %instance.backend,
                    "Backend no longer configured, marking instance terminated"
                );
            }
        }

        self.persistence
            .set_instance_status(instance.id, InstanceStatus::Terminated)
            .await?;
        Ok(true)
    }

    fn delete(&self) -> Option<ResourceUpdate> {
        self.hinter.hint_fetch(ResourceKind::PlacementGroup);
        Some(ResourceUpdate::Fleet(FleetUpdate {
            status: Some(FleetStatus::Terminated),
            deleted: true,
        }))
    }
}

#[async_trait]
impl PipelineProcessor for FleetProcessor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Fleet
    }

    async fn process(&self, item: &PipelineItem) -> Result<Option<ResourceUpdate>> {
        let Some(fleet) = self.persistence.get_fleet(item.id).await? else {
            return Ok(None);
        };
        if fleet.lease.deleted || fleet.status == FleetStatus::Terminated {
            return Ok(None);
        }

        let active: Vec<Instance> = self
            .persistence
            .list_fleet_instances(fleet.id)
            .await?
            .into_iter()
            .filter(|i| i.status.is_active())
            .collect();

        match fleet.status {
            FleetStatus::Active if fleet.autocreated && active.is_empty() => {
                info!(fleet_id = %fleet.id, fleet_name = %fleet.name, "Deleting empty autocreated fleet");
                Ok(self.delete())
            }
            FleetStatus::Terminating => {
                let mut remaining = 0;
                for instance in &active {
                    if !self.terminate_instance(instance).await? {
                        remaining += 1;
                    }
                }
                if remaining > 0 {
                    return Ok(None);
                }
                info!(fleet_id = %fleet.id, fleet_name = %fleet.name, "Fleet terminated");
                Ok(self.delete())
            }
            _ => Ok(None),
        }
    }
}
