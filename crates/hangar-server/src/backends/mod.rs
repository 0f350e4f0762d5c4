// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compute backend abstraction.
//!
//! Provides a unified interface over cloud and on-prem compute providers.

/// Backend trait definitions.
pub mod traits;

/// Mock backend for testing.
pub mod mock;

/// Backend registry and factories.
pub mod registry;

/// Backend that runs jobs on the server host.
#[cfg(feature = "local")]
pub mod local;

pub use mock::{LaunchBehavior, MockCompute};
pub use registry::{BackendFactory, BackendRegistry};
pub use traits::{
    BackendError, Compute, InstanceState, LaunchedInstanceInfo, ProvisionError, Result,
};

#[cfg(feature = "local")]
pub use local::{LocalCompute, LocalComputeConfig};
