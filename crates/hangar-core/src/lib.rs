// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hangar Core - domain model, storage and locking for the hangar control plane
//!
//! This crate holds everything the orchestration layer (`hangar-server`) needs
//! to share state safely between tasks and between server replicas: the job and
//! managed-resource model, a persistence abstraction with lease-based claims,
//! in-process and database locks, and the retry budget policy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            hangar-server                                 │
//! │     scheduler · job monitor · resubmission · pipelines (fleets, ...)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                         │                           │
//!           ▼                         ▼                           ▼
//! ┌───────────────────┐   ┌──────────────────────┐   ┌──────────────────────┐
//! │  ResourceLocker   │   │     Persistence      │   │    AdvisoryLocker    │
//! │ (in-process sets) │   │ claim / release by   │   │ (pg_advisory_lock)   │
//! │                   │   │ lease token          │   │                      │
//! └───────────────────┘   └──────────────────────┘   └──────────────────────┘
//!                                     │
//!                         ┌───────────┴───────────┐
//!                         ▼                       ▼
//!               ┌──────────────────┐    ┌──────────────────┐
//!               │    PostgreSQL    │    │      Memory      │
//!               └──────────────────┘    └──────────────────┘
//! ```
//!
//! # Leases
//!
//! Every pipeline-managed row and every job carries `lock_token` and
//! `lock_expires_at`. A row is claimable iff it is not deleted and its token is
//! unset or its lease has expired. Claims and releases are single atomic
//! operations; a release whose token no longer owns the row changes nothing.
//!
//! | Column | Set on claim | Set on release |
//! |--------|--------------|----------------|
//! | `lock_token` | fresh UUID | `NULL` |
//! | `lock_expires_at` | now + lease | `NULL` |
//! | `last_processed_at` | unchanged | now |
//!
//! # Job Status State Machine
//!
//! ```text
//!   SUBMITTED ──claim──► PROVISIONING ──► PULLING ──► RUNNING
//!      ▲  │                   │                          │
//!      │  │ no backend        │ failed start /           │ lost instance
//!      │  ▼                   ▼ lost instance            ▼
//!      │ FAILED ◄──budget spent── (retry policy) ──► PENDING
//!      │                                                 │
//!      └───────────────── resubmission ◄─────────────────┘
//!
//!   any active ──stop──► TERMINATING ──► TERMINATED / DONE / FAILED
//! ```
//!
//! # Modules
//!
//! - [`models`]: Jobs, offers, requirements and managed resources
//! - [`locking`]: In-process locksets and Postgres advisory locks
//! - [`retry`]: Resubmission eligibility and pending-job backoff
//! - [`persistence`]: Storage trait with PostgreSQL and in-memory backends
//! - [`migrations`]: Embedded PostgreSQL schema
//! - [`error`]: Error types

#![deny(missing_docs)]

/// Error types for persistence and validation.
pub mod error;

/// In-process locksets and database advisory locks.
pub mod locking;

/// Embedded database migrations.
pub mod migrations;

/// Domain types.
pub mod models;

/// Storage abstraction and backends.
pub mod persistence;

/// Retry budget and resubmission backoff.
pub mod retry;

pub use error::{CoreError, Result};
pub use locking::{AdvisoryLocker, KeyLockGuard, ResourceLocker};
pub use persistence::{MemoryPersistence, Persistence, PostgresPersistence};
