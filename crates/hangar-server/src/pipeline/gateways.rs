// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gateway reconciliation.

use async_trait::async_trait;
use hangar_core::models::{GatewayStatus, PipelineItem, ResourceKind};
use hangar_core::persistence::{GatewayUpdate, Persistence, ResourceUpdate};
use std::sync::Arc;
use tracing::{info, warn};

use super::PipelineProcessor;
use crate::backends::{BackendError, BackendRegistry};
use crate::error::Result;

/// Processor for the `gateways` pipeline.
///
/// Creates submitted gateways and tears down gateways marked for deletion.
pub struct GatewayProcessor {
    persistence: Arc<dyn Persistence>,
    backends: Arc<BackendRegistry>,
}

impl GatewayProcessor {
    /// Create a gateway processor.
    pub fn new(persistence: Arc<dyn Persistence>, backends: Arc<BackendRegistry>) -> Self {
        Self {
            persistence,
            backends,
        }
    }
}

fn failed(message: String) -> Option<ResourceUpdate> {
    Some(ResourceUpdate::Gateway(GatewayUpdate {
        status: Some(GatewayStatus::Failed),
        status_message: Some(message),
        ..Default::default()
    }))
}

#[async_trait]
impl PipelineProcessor for GatewayProcessor {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Gateway
    }

    async fn process(&self, item: &PipelineItem) -> Result<Option<ResourceUpdate>> {
        let Some(gateway) = self.persistence.get_gateway(item.id).await? else {
            return Ok(None);
        };
        if gateway.lease.deleted {
            return Ok(None);
        }

        let backend = self
            .backends
            .get_backend(
                self.persistence.as_ref(),
                &gateway.project_name,
                gateway.backend,
            )
            .await?;

        if gateway.to_be_deleted {
            match (&gateway.provisioning_data, backend) {
                (Some(data), Some(backend)) => {
                    match backend
                        .terminate_gateway(
                            &data.instance_id,
                            &data.region,
                            data.backend_data.as_deref(),
                        )
                        .await
                    {
                        Ok(()) | Err(BackendError::ResourceNotFound(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                (Some(data), None) => {
                    warn!(
                        gateway_id = %gateway.id,
                        instance_id = %data.instance_id,
                        backend = %gateway.backend,
                        "Backend no longer configured, dropping gateway without termination"
                    );
                }
                (None, _) => {}
            }
            info!(gateway_id = %gateway.id, gateway_name = %gateway.name, "Gateway deleted");
            return Ok(Some(ResourceUpdate::Gateway(GatewayUpdate {
                deleted: true,
                ..Default::default()
            })));
        }

        if gateway.status != GatewayStatus::Submitted {
            return Ok(None);
        }

        let Some(backend) = backend else {
            return Ok(failed(format!(
                "backend {} is not configured for project {}",
                gateway.backend, gateway.project_name
            )));
        };

        match backend.create_gateway(&gateway).await {
            Ok(data) => {
                info!(
                    gateway_id = %gateway.id,
                    gateway_name = %gateway.name,
                    ip_address = %data.ip_address,
                    "Gateway running"
                );
                Ok(Some(ResourceUpdate::Gateway(GatewayUpdate {
                    status: Some(GatewayStatus::Running),
                    provisioning_data: Some(data),
                    ..Default::default()
                })))
            }
            Err(e) => {
                warn!(gateway_id = %gateway.id, error = %e, "Failed to create gateway");
                Ok(failed(e.to_string()))
            }
        }
    }
}
