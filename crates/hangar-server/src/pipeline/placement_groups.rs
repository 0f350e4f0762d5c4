// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Placement group reconciliation.

use async_trait::async_trait;
use hangar_core::models::{PipelineItem, ResourceKind};
use hangar_core::persistence::{Persistence, PlacementGroupUpdate, ResourceUpdate};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::PipelineProcessor;
use crate::backends::{BackendError, BackendRegistry};
use crate::error::Result;

/// Processor for the `placement_groups` pipeline.
///
/// Deletes groups marked for deletion and groups whose fleet is gone. A
/// group the backend still reports in use is kept for a later pass.
pub struct PlacementGroupProcessor {
    persistence: Arc<dyn Persistence>,
    backends: Arc<BackendRegistry>,
}

impl PlacementGroupProcessor {
    /// Create a placement group processor.
    pub fn new(persistence: Arc<dyn Persistence>, backends: Arc<BackendRegistry>) -> Self {
        Self {
            persistence,
            backends,
        }
    }
}

#[async_trait]
impl PipelineProcessor for PlacementGroupProcessor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PlacementGroup
    }

    async fn process(&self, item: &PipelineItem) -> Result<Option<ResourceUpdate>> {
        let Some(group) = self.persistence.get_placement_group(item.id).await? else {
            return Ok(None);
        };
        if group.lease.deleted {
            return Ok(None);
        }

        let fleet_deleted = match self.persistence.get_fleet(group.fleet_id).await? {
            Some(fleet) => fleet.lease.deleted,
            None => true,
        };
        if !group.to_be_deleted && !fleet_deleted {
            return Ok(None);
        }

        let backend = self
            .backends
            .get_backend(self.persistence.as_ref(), &group.project_name, group.backend)
            .await?;
        match backend {
            Some(backend) => match backend.delete_placement_group(&group).await {
                Ok(()) | Err(BackendError::ResourceNotFound(_)) => {}
                Err(BackendError::PlacementGroupInUse(_)) => {
                    debug!(
                        placement_group_id = %group.id,
                        placement_group = %group.name,
                        "Placement group still in use, keeping it"
                    );
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            },
            None => {
                warn!(
                    placement_group_id = %group.id,
                    backend = %group.backend,
                    "Backend no longer configured, dropping placement group record"
                );
            }
        }

        info!(
            placement_group_id = %group.id,
            placement_group = %group.name,
            fleet_id = %group.fleet_id,
            "Placement group deleted"
        );
        Ok(Some(ResourceUpdate::PlacementGroup(PlacementGroupUpdate {
            deleted: true,
        })))
    }
}
