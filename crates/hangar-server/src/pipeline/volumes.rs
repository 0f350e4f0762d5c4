// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Volume reconciliation.

use async_trait::async_trait;
use hangar_core::models::{PipelineItem, ResourceKind, VolumeStatus};
use hangar_core::persistence::{Persistence, ResourceUpdate, VolumeUpdate};
use std::sync::Arc;
use tracing::{info, warn};

use super::PipelineProcessor;
use crate::backends::{BackendError, BackendRegistry};
use crate::error::Result;

/// Processor for the `volumes` pipeline.
///
/// Submitted volumes are created, or looked up when they reference an
/// existing cloud volume. Volumes marked for deletion are deleted; external
/// volumes are only forgotten.
pub struct VolumeProcessor {
    persistence: Arc<dyn Persistence>,
    backends: Arc<BackendRegistry>,
}

impl VolumeProcessor {
    /// Create a volume processor.
    pub fn new(persistence: Arc<dyn Persistence>, backends: Arc<BackendRegistry>) -> Self {
        Self {
            persistence,
            backends,
        }
    }
}

fn failed(message: String) -> Option<ResourceUpdate> {
    Some(ResourceUpdate::Volume(VolumeUpdate {
        status: Some(VolumeStatus::Failed),
        status_message: Some(message),
        ..Default::default()
    }))
}

#[async_trait]
impl PipelineProcessor for VolumeProcessor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    async fn process(&self, item: &PipelineItem) -> Result<Option<ResourceUpdate>> {
        let Some(volume) = self.persistence.get_volume(item.id).await? else {
            return Ok(None);
        };
        if volume.lease.deleted {
            return Ok(None);
        }

        let backend = self
            .backends
            .get_backend(self.persistence.as_ref(), &volume.project_name, volume.backend)
            .await?;

        if volume.to_be_deleted {
            if !volume.is_external() && volume.provisioning_data.is_some() {
                match backend {
                    Some(backend) => match backend.delete_volume(&volume).await {
                        Ok(()) | Err(BackendError::ResourceNotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    },
                    None => {
                        warn!(
                            volume_id = %volume.id,
                            backend = %volume.backend,
                            "Backend no longer configured, dropping volume record"
                        );
                    }
                }
            }
            info!(volume_id = %volume.id, volume_name = %volume.name, "Volume deleted");
            return Ok(Some(ResourceUpdate::Volume(VolumeUpdate {
                deleted: true,
                ..Default::default()
            })));
        }

        if volume.status != VolumeStatus::Submitted {
            return Ok(None);
        }

        let Some(backend) = backend else {
            return Ok(failed(format!(
                "backend {} is not configured for project {}",
                volume.backend, volume.project_name
            )));
        };

        let result = if volume.is_external() {
            backend.register_volume(&volume).await
        } else {
            backend.create_volume(&volume).await
        };
        match result {
            Ok(data) => {
                info!(
                    volume_id = %volume.id,
                    volume_name = %volume.name,
                    cloud_volume_id = %data.volume_id,
                    size_gb = data.size_gb,
                    "Volume active"
                );
                Ok(Some(ResourceUpdate::Volume(VolumeUpdate {
                    status: Some(VolumeStatus::Active),
                    provisioning_data: Some(data),
                    ..Default::default()
                })))
            }
            Err(e) => {
                warn!(volume_id = %volume.id, error = %e, "Failed to provision volume");
                Ok(failed(e.to_string()))
            }
        }
    }
}
