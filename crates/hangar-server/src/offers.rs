// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Offer discovery and ranking.
//!
//! Asks every permitted backend for offers concurrently, keeps the ones the
//! job can use, and orders them by price. Discovery order breaks price ties.

use futures::stream::{self, StreamExt};
use hangar_core::models::{InstanceOffer, Job};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backends::Compute;

/// Default number of backends queried at once.
pub const DEFAULT_MAX_CONCURRENT_BACKENDS: usize = 4;

/// An offer together with the backend that made it.
pub type Candidate = (Arc<dyn Compute>, InstanceOffer);

/// All offers for `job` across `backends`, cheapest first.
///
/// Backends whose discovery call fails are skipped for this round. With
/// `exclude_not_available`, offers known to be unobtainable are dropped.
pub async fn get_instance_candidates(
    backends: &[Arc<dyn Compute>],
    job: &Job,
    exclude_not_available: bool,
    max_concurrent_backends: usize,
) -> Vec<Candidate> {
    let requirements = &job.requirements;
    let job_id = job.id;

    // Discovery futures own their inputs so the stream is Send inside spawned tasks.
    let discoveries: Vec<_> = backends
        .iter()
        .cloned()
        .map(|backend| {
            let requirements = requirements.clone();
            async move {
                match backend.get_offers(&requirements).await {
                    Ok(offers) => offers
                        .into_iter()
                        .map(|offer| (backend.clone(), offer))
                        .collect::<Vec<Candidate>>(),
                    Err(e) => {
                        warn!(
                            job_id = %job_id,
                            backend = %backend.backend_type(),
                            error = %e,
                            "Failed to get offers, skipping backend"
                        );
                        Vec::new()
                    }
                }
            }
        })
        .collect();

    let per_backend: Vec<Vec<Candidate>> = stream::iter(discoveries)
        .buffered(max_concurrent_backends.max(1))
        .collect()
        .await;

    let candidates: Vec<Candidate> = per_backend
        .into_iter()
        .flatten()
        .filter(|(_, offer)| requirements.satisfied_by(offer))
        .filter(|(_, offer)| !exclude_not_available || offer.availability.is_usable())
        .collect();

    let ranked = rank_offers(candidates, |(_, offer)| offer.price);
    debug!(job_id = %job.id, candidates = ranked.len(), "Collected instance candidates");
    ranked
}

/// Sort by ascending price, keeping input order for equal prices.
pub fn rank_offers<T, F>(mut items: Vec<T>, price: F) -> Vec<T>
where
    F: Fn(&T) -> f64,
{
    items.sort_by(|a, b| price(a).total_cmp(&price(b)));
    items
}
