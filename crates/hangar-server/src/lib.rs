// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hangar Server - provisioning control plane
//!
//! This crate runs the orchestration side of hangar: it places submitted jobs
//! on the cheapest backend offer that launches, supervises the instances
//! those jobs hold, and reconciles fleets, gateways, placement groups and
//! volumes against their backends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      hangar-server (This Crate)                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐  ┌─────────────┐    │
//! │  │     Job     │  │     Job     │  │ Resubmission │  │  Pipelines  │    │
//! │  │  Scheduler  │  │   Monitor   │  │    (lock)    │  │ fleets, ... │    │
//! │  └─────────────┘  └─────────────┘  └──────────────┘  └─────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                 │                 │                │
//!           ▼                 ▼                 ▼                ▼
//! ┌──────────────────────────────────┐   ┌──────────────────────────────────┐
//! │     hangar-core Persistence      │   │        BackendRegistry           │
//! │  (leases, claims, advisory lock) │   │  aws · gcp · azure · ... · local │
//! └──────────────────────────────────┘   └──────────────────────────────────┘
//!                   │                                    │
//!                   ▼                                    ▼
//!             PostgreSQL                        Cloud provider APIs
//! ```
//!
//! # Background Tasks
//!
//! | Task | Claims | Interval |
//! |------|--------|----------|
//! | Job scheduler | one SUBMITTED job | 2s |
//! | Job monitor | one PROVISIONING/PULLING/RUNNING/TERMINATING job | 5s |
//! | Resubmission | `hangar:pending_jobs` advisory lock | 5s |
//! | Fleet pipeline | batch of fleets | 10s or hint |
//! | Gateway pipeline | batch of gateways | 10s or hint |
//! | Placement group pipeline | batch of placement groups | 10s or hint |
//! | Volume pipeline | batch of volumes | 10s or hint |
//!
//! Within one process the `jobs` lockset and one lockset per resource table
//! keep an item from being worked on twice. Across replicas the lease token
//! on each row does the same.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HANGAR_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `HANGAR_SCHEDULER_INTERVAL_SECS` | No | `2` | Job scheduler tick |
//! | `HANGAR_JOB_MONITOR_INTERVAL_SECS` | No | `5` | Job monitor tick |
//! | `HANGAR_RESUBMISSION_INTERVAL_SECS` | No | `5` | Resubmission tick |
//! | `HANGAR_PIPELINE_POLL_INTERVAL_SECS` | No | `10` | Pipeline fetch interval |
//! | `HANGAR_PIPELINE_LEASE_SECS` | No | `30` | Pipeline item lease |
//! | `HANGAR_PIPELINE_WORKERS` | No | `2` | Workers per pipeline |
//! | `HANGAR_PROVISIONING_TIMEOUT_SECS` | No | `600` | Max instance boot time |
//! | `HANGAR_LOCAL_BACKEND` | No | `true` | Register the local backend |
//!
//! # Modules
//!
//! - [`backends`]: Compute trait, registry, mock and local backends
//! - [`offers`]: Offer discovery and price ranking
//! - [`scheduler`]: Submitted-job provisioning
//! - [`job_monitor`]: Active-job supervision
//! - [`resubmission`]: Pending-job resubmission
//! - [`pipeline`]: Reconciliation pipelines
//! - [`runtime`]: Embeddable runtime wiring every task
//! - [`config`]: Server configuration
//! - [`error`]: Error types

#![deny(missing_docs)]

/// Compute backends.
pub mod backends;

/// Server configuration.
pub mod config;

/// Error types.
pub mod error;

/// Active-job supervision.
pub mod job_monitor;

/// Offer discovery and ranking.
pub mod offers;

/// Reconciliation pipelines for managed resources.
pub mod pipeline;

/// Pending-job resubmission.
pub mod resubmission;

/// Embeddable runtime for the control plane.
pub mod runtime;

/// Submitted-job scheduler.
pub mod scheduler;

/// Periodic task helper.
pub mod ticker;

pub use config::Config;
pub use error::Error;
