// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hangar Server - provisioning control plane
//!
//! Runs the background side of the control plane:
//! - Job scheduler (offer ranking, failover across backends)
//! - Job monitor (instance health, provisioning timeout, retry policy)
//! - Pending job resubmission
//! - Reconciliation pipelines for fleets, gateways, placement groups and volumes

use std::sync::Arc;
use tracing::{info, warn};

use hangar_core::PostgresPersistence;
use hangar_core::migrations;
use hangar_server::backends::BackendRegistry;
#[cfg(feature = "local")]
use hangar_server::backends::{Compute, LocalCompute};
use hangar_server::config::Config;
use hangar_server::runtime::ControlPlaneRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hangar_server=info,hangar_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        scheduler_interval_secs = config.scheduler.poll_interval.as_secs(),
        pipeline_workers = config.pipeline.workers,
        local_backend = config.local_backend,
        "Starting Hangar Server"
    );

    // Connect to database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    migrations::run_postgres(&pool).await?;

    info!("Database migrations applied");

    // Register compute backends
    let backends = register_backends(&config);
    info!(backends = ?backends.registered_types(), "Backends registered");

    let persistence = Arc::new(PostgresPersistence::new(pool));

    // Start the runtime
    let runtime = ControlPlaneRuntime::builder()
        .persistence(persistence)
        .backends(Arc::new(backends))
        .scheduler_config(config.scheduler)
        .job_monitor_config(config.job_monitor)
        .resubmission_config(config.resubmission)
        .pipeline_config(config.pipeline)
        .build()?
        .start()
        .await?;

    info!("Hangar Server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("Hangar Server shut down");

    Ok(())
}

fn register_backends(config: &Config) -> BackendRegistry {
    let mut backends = BackendRegistry::new();
    if config.local_backend {
        register_local(&mut backends);
    }
    backends
}

#[cfg(feature = "local")]
fn register_local(backends: &mut BackendRegistry) {
    backends.register(
        hangar_core::models::BackendType::Local,
        Arc::new(|c: &hangar_core::models::BackendConfig| {
            LocalCompute::from_backend_config(c).map(|b| Arc::new(b) as Arc<dyn Compute>)
        }),
    );
}

#[cfg(not(feature = "local"))]
fn register_local(_backends: &mut BackendRegistry) {
    warn!("HANGAR_LOCAL_BACKEND is set but this build has no local backend");
}
