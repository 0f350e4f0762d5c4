// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic background tasks.
//!
//! Every periodic worker in the server runs through [`spawn_periodic`]: one
//! tick per interval until its cancellation token fires. A tick that is
//! already running when cancellation arrives is allowed to finish.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawn `tick` every `interval` until `cancel` fires.
///
/// Errors returned by a tick are logged and the loop continues.
pub fn spawn_periodic<F, Fut, E>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        info!(
            task = name,
            interval_ms = interval.as_millis() as u64,
            "Periodic task started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = tick().await {
                        error!(task = name, error = %e, "Periodic task tick failed");
                    }
                }
            }
        }

        info!(task = name, "Periodic task stopped");
    })
}
