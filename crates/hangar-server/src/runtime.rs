// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for hangar-server.
//!
//! This module provides [`ControlPlaneRuntime`], which starts every background
//! task of the control plane inside an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hangar_core::PostgresPersistence;
//! use hangar_server::backends::BackendRegistry;
//! use hangar_server::runtime::ControlPlaneRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let persistence = Arc::new(PostgresPersistence::new(pool));
//!
//!     let runtime = ControlPlaneRuntime::builder()
//!         .persistence(persistence)
//!         .backends(Arc::new(BackendRegistry::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use hangar_core::ResourceLocker;
use hangar_core::persistence::Persistence;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backends::BackendRegistry;
use crate::job_monitor::{JobMonitor, JobMonitorConfig};
use crate::pipeline::{
    FleetProcessor, GatewayProcessor, Pipeline, PipelineConfig, PipelineHinter, PipelineManager,
    PipelineProcessor, PlacementGroupProcessor, VolumeProcessor,
};
use crate::resubmission::{ResubmissionConfig, ResubmissionTask};
use crate::scheduler::{JobScheduler, SchedulerConfig};

/// Builder for creating a [`ControlPlaneRuntime`].
#[derive(Default)]
pub struct ControlPlaneRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    backends: Option<Arc<BackendRegistry>>,
    locker: Option<Arc<ResourceLocker>>,
    scheduler: SchedulerConfig,
    job_monitor: JobMonitorConfig,
    resubmission: ResubmissionConfig,
    pipeline: PipelineConfig,
}

impl ControlPlaneRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the backend registry (required).
    pub fn backends(mut self, backends: Arc<BackendRegistry>) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Share an in-process resource locker with other components.
    ///
    /// Default: a fresh locker owned by the runtime
    pub fn locker(mut self, locker: Arc<ResourceLocker>) -> Self {
        self.locker = Some(locker);
        self
    }

    /// Set the job scheduler configuration.
    ///
    /// Default: 2 second poll interval
    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Set the job monitor configuration.
    ///
    /// Default: 5 second poll interval, 10 minute provisioning timeout
    pub fn job_monitor_config(mut self, config: JobMonitorConfig) -> Self {
        self.job_monitor = config;
        self
    }

    /// Set the resubmission task configuration.
    ///
    /// Default: 5 second poll interval
    pub fn resubmission_config(mut self, config: ResubmissionConfig) -> Self {
        self.resubmission = config;
        self
    }

    /// Set the configuration shared by all reconciliation pipelines.
    ///
    /// Default: 2 workers, 10 second poll interval, 30 second lease
    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ControlPlaneRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let backends = self
            .backends
            .ok_or_else(|| anyhow::anyhow!("backends is required"))?;

        Ok(ControlPlaneRuntimeConfig {
            persistence,
            backends,
            locker: self.locker.unwrap_or_default(),
            scheduler: self.scheduler,
            job_monitor: self.job_monitor,
            resubmission: self.resubmission,
            pipeline: self.pipeline,
        })
    }
}

/// Configuration for a [`ControlPlaneRuntime`].
pub struct ControlPlaneRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    backends: Arc<BackendRegistry>,
    locker: Arc<ResourceLocker>,
    scheduler: SchedulerConfig,
    job_monitor: JobMonitorConfig,
    resubmission: ResubmissionConfig,
    pipeline: PipelineConfig,
}

impl ControlPlaneRuntimeConfig {
    /// Start the scheduler, job monitor, resubmission task and pipelines.
    pub async fn start(self) -> Result<ControlPlaneRuntime> {
        let cancel = CancellationToken::new();
        let hinter = PipelineHinter::new();

        let scheduler = Arc::new(JobScheduler::new(
            self.persistence.clone(),
            self.backends.clone(),
            self.locker.clone(),
            self.scheduler,
        ));
        let scheduler_handle = scheduler.spawn(cancel.child_token());

        let monitor = Arc::new(JobMonitor::new(
            self.persistence.clone(),
            self.backends.clone(),
            self.locker.clone(),
            hinter.clone(),
            self.job_monitor,
        ));
        let monitor_handle = monitor.spawn(cancel.child_token());

        let resubmission = Arc::new(ResubmissionTask::new(
            self.persistence.clone(),
            self.resubmission,
        ));
        let resubmission_handle = resubmission.spawn(cancel.child_token());

        let processors: Vec<Arc<dyn PipelineProcessor>> = vec![
            Arc::new(FleetProcessor::new(
                self.persistence.clone(),
                self.backends.clone(),
                hinter.clone(),
            )),
            Arc::new(GatewayProcessor::new(
                self.persistence.clone(),
                self.backends.clone(),
            )),
            Arc::new(PlacementGroupProcessor::new(
                self.persistence.clone(),
                self.backends.clone(),
            )),
            Arc::new(VolumeProcessor::new(
                self.persistence.clone(),
                self.backends.clone(),
            )),
        ];
        let mut pipelines = PipelineManager::new(hinter.clone());
        for processor in processors {
            pipelines.add(Pipeline::new(
                processor,
                self.persistence.clone(),
                self.locker.clone(),
                &hinter,
                self.pipeline.clone(),
            ));
        }
        pipelines.start();

        info!(
            backends = ?self.backends.registered_types(),
            pipelines = pipelines.pipelines().len(),
            "ControlPlaneRuntime started"
        );

        Ok(ControlPlaneRuntime {
            cancel,
            scheduler_handle,
            monitor_handle,
            resubmission_handle,
            pipelines,
            hinter,
        })
    }
}

/// A running control plane that can be embedded in an application.
///
/// The runtime manages:
/// - Job scheduler placing SUBMITTED jobs on backend offers
/// - Job monitor supervising jobs that hold instances
/// - Resubmission task returning PENDING jobs to the scheduler
/// - Reconciliation pipelines for fleets, gateways, placement groups and volumes
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ControlPlaneRuntime {
    cancel: CancellationToken,
    scheduler_handle: JoinHandle<()>,
    monitor_handle: JoinHandle<()>,
    resubmission_handle: JoinHandle<()>,
    pipelines: PipelineManager,
    hinter: PipelineHinter,
}

impl ControlPlaneRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ControlPlaneRuntimeBuilder {
        ControlPlaneRuntimeBuilder::new()
    }

    /// Hinter for waking pipelines from outside the runtime.
    pub fn hinter(&self) -> &PipelineHinter {
        &self.hinter
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals every task to stop, lets in-flight work finish and waits for
    /// all tasks to complete.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("ControlPlaneRuntime shutting down...");

        self.cancel.cancel();
        self.pipelines.shutdown();

        if let Err(e) = self.scheduler_handle.await {
            error!("Job scheduler task panicked: {}", e);
        }
        if let Err(e) = self.monitor_handle.await {
            error!("Job monitor task panicked: {}", e);
        }
        if let Err(e) = self.resubmission_handle.await {
            error!("Resubmission task panicked: {}", e);
        }
        self.pipelines.drain().await;

        info!("ControlPlaneRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && !self.scheduler_handle.is_finished()
            && !self.monitor_handle.is_finished()
            && !self.resubmission_handle.is_finished()
    }
}
