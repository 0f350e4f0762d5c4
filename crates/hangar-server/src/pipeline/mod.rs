// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation pipelines.
//!
//! One [`Pipeline`] runs per managed-resource kind. Every pipeline follows the
//! same protocol, only [`PipelineProcessor::process`] differs:
//!
//! ```text
//!   fetcher ──claim batch (lease)──► channel ──► workers ──process──► release
//!      ▲                                            │
//!      └── poll interval / hint                     └── heartbeater extends leases
//! ```
//!
//! A claimed item stays owned for the lease. Release clears the lease and
//! commits the processor's update in one step, conditioned on the lease
//! token, so a worker that lost its lease changes nothing. Items of crashed
//! workers become claimable again once their lease expires, which makes every
//! processor re-check its conditions instead of trusting earlier passes.

pub mod fleets;
pub mod gateways;
pub mod placement_groups;
pub mod volumes;

pub use fleets::FleetProcessor;
pub use gateways::GatewayProcessor;
pub use placement_groups::PlacementGroupProcessor;
pub use volumes::VolumeProcessor;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use hangar_core::models::{PipelineItem, ResourceKind};
use hangar_core::persistence::{Claim, Persistence, ResourceUpdate, to_chrono};
use hangar_core::{KeyLockGuard, ResourceLocker};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Kind-specific reconciliation step.
#[async_trait]
pub trait PipelineProcessor: Send + Sync {
    /// Resource kind this processor handles.
    fn kind(&self) -> ResourceKind;

    /// Reconcile one claimed item.
    ///
    /// The returned update is committed together with the lease release.
    /// Errors are logged by the pipeline and the lease is released anyway.
    async fn process(&self, item: &PipelineItem) -> Result<Option<ResourceUpdate>>;
}

/// Configuration shared by reconciliation pipelines.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker tasks per pipeline.
    pub workers: usize,
    /// Maximum items claimed per fetch.
    pub batch_size: usize,
    /// Fetch interval when no hint arrives.
    pub poll_interval: Duration,
    /// Lease taken on claimed items.
    pub lease: Duration,
    /// Minimum time between two passes over the same item.
    pub min_processing_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            batch_size: 10,
            poll_interval: Duration::from_secs(10),
            lease: Duration::from_secs(30),
            min_processing_interval: Duration::from_secs(2),
        }
    }
}

// ============================================================================
// Hints
// ============================================================================

/// Wakes pipelines ahead of their poll interval.
///
/// Hints only reduce latency; pipelines poll regardless.
#[derive(Clone, Default)]
pub struct PipelineHinter {
    wakers: Arc<RwLock<HashMap<ResourceKind, Arc<Notify>>>>,
}

impl PipelineHinter {
    /// Create a hinter with no pipelines attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake-up handle for `kind`, created on first use.
    pub fn register(&self, kind: ResourceKind) -> Arc<Notify> {
        if let Some(notify) = self
            .wakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
        {
            return notify.clone();
        }
        self.wakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .clone()
    }

    /// Ask the pipeline for `kind` to fetch now.
    pub fn hint_fetch(&self, kind: ResourceKind) {
        debug!(kind = %kind, "Pipeline fetch hinted");
        self.register(kind).notify_one();
    }
}

// ============================================================================
// Pipeline
// ============================================================================

type Claimed = (PipelineItem, KeyLockGuard);

/// Claim, process and release loop for one resource kind.
pub struct Pipeline {
    processor: Arc<dyn PipelineProcessor>,
    persistence: Arc<dyn Persistence>,
    locker: Arc<ResourceLocker>,
    config: PipelineConfig,
    wake: Arc<Notify>,
    in_flight: Mutex<HashMap<Uuid, PipelineItem>>,
}

impl Pipeline {
    /// Create a pipeline for `processor`'s kind.
    pub fn new(
        processor: Arc<dyn PipelineProcessor>,
        persistence: Arc<dyn Persistence>,
        locker: Arc<ResourceLocker>,
        hinter: &PipelineHinter,
        config: PipelineConfig,
    ) -> Self {
        let wake = hinter.register(processor.kind());
        Self {
            processor,
            persistence,
            locker,
            config,
            wake,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resource kind this pipeline handles.
    pub fn kind(&self) -> ResourceKind {
        self.processor.kind()
    }

    /// Ids of items claimed and not yet released.
    pub fn in_flight(&self) -> Vec<Uuid> {
        self.tracked().keys().copied().collect()
    }

    fn tracked(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, PipelineItem>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim up to `limit` items not already being worked on in this process.
    async fn claim(&self, limit: usize) -> Result<Vec<Claimed>> {
        let kind = self.kind();
        let lockset = self.locker.get_lockset(kind.table_name());
        let _namespace = lockset.lock().await;

        let exclude = lockset.locked_ids();
        let claim = Claim::new(self.config.lease, &exclude)
            .min_processing_interval(self.config.min_processing_interval);
        let items = self.persistence.claim_items(kind, &claim, limit).await?;

        let mut claimed = Vec::with_capacity(items.len());
        for item in items {
            if item.prev_lock_expired {
                debug!(kind = %kind, item_id = %item.id, "Reclaimed item with expired lease");
            }
            match lockset.try_claim([item.id]) {
                Some(guard) => {
                    self.tracked().insert(item.id, item.clone());
                    claimed.push((item, guard));
                }
                None => {
                    self.persistence.release_item(&item, None).await?;
                }
            }
        }
        Ok(claimed)
    }

    /// Claim and process a single item inline.
    ///
    /// Returns the id of the processed item, or `None` if nothing was claimable.
    pub async fn process_one(&self) -> Result<Option<Uuid>> {
        let Some((item, guard)) = self.claim(1).await?.pop() else {
            return Ok(None);
        };
        let id = item.id;
        self.process_item(item, guard).await;
        Ok(Some(id))
    }

    async fn process_item(&self, item: PipelineItem, _guard: KeyLockGuard) {
        let kind = self.kind();
        let result = AssertUnwindSafe(self.processor.process(&item))
            .catch_unwind()
            .await;

        let update = match result {
            Ok(Ok(update)) => update,
            Ok(Err(e)) => {
                error!(kind = %kind, item_id = %item.id, error = %e, "Failed to process item");
                None
            }
            Err(_) => {
                error!(kind = %kind, item_id = %item.id, "Processor panicked");
                None
            }
        };

        self.release(&item, update.as_ref()).await;
    }

    async fn release(&self, item: &PipelineItem, update: Option<&ResourceUpdate>) {
        match self.persistence.release_item(item, update).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    kind = %item.kind,
                    item_id = %item.id,
                    "Item lease lost before release, discarding update"
                );
            }
            Err(e) => {
                error!(kind = %item.kind, item_id = %item.id, error = %e, "Failed to release item");
            }
        }
        self.tracked().remove(&item.id);
    }

    /// Push the lease of every in-flight item.
    async fn heartbeat(&self) {
        let items: Vec<PipelineItem> = self.tracked().values().cloned().collect();
        if items.is_empty() {
            return;
        }

        let expires = Utc::now() + to_chrono(self.config.lease);
        match self.persistence.extend_leases(&items, expires).await {
            Ok(extended) => {
                let mut tracked = self.tracked();
                for item in &items {
                    if extended.contains(&item.id) {
                        if let Some(entry) = tracked.get_mut(&item.id) {
                            entry.lock_expires_at = expires;
                        }
                    } else {
                        warn!(kind = %item.kind, item_id = %item.id, "Item lease lost while processing");
                    }
                }
            }
            Err(e) => {
                error!(kind = %self.kind(), error = %e, "Failed to extend item leases");
            }
        }
    }

    /// Start the fetcher, workers and heartbeater until `cancel` fires.
    ///
    /// On cancellation in-flight items finish, and queued items are released
    /// without changes.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let kind = self.kind();
            info!(
                kind = %kind,
                workers = self.config.workers,
                batch_size = self.config.batch_size,
                "Pipeline started"
            );

            let (tx, rx) = mpsc::channel::<Claimed>(self.config.batch_size.max(1));
            let rx = Arc::new(tokio::sync::Mutex::new(rx));

            let heartbeat_cancel = CancellationToken::new();
            let heartbeater = tokio::spawn(self.clone().heartbeater(heartbeat_cancel.clone()));

            let mut tasks = JoinSet::new();
            tasks.spawn(self.clone().fetcher(tx, cancel.clone()));
            for _ in 0..self.config.workers.max(1) {
                tasks.spawn(self.clone().worker(rx.clone(), cancel.clone()));
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(kind = %kind, error = %e, "Pipeline task panicked");
                }
            }

            let mut rx = rx.lock().await;
            while let Ok((item, _guard)) = rx.try_recv() {
                self.release(&item, None).await;
            }

            heartbeat_cancel.cancel();
            if let Err(e) = heartbeater.await {
                error!(kind = %kind, error = %e, "Pipeline heartbeater panicked");
            }
            info!(kind = %kind, "Pipeline stopped");
        })
    }

    async fn fetcher(self: Arc<Self>, tx: mpsc::Sender<Claimed>, cancel: CancellationToken) {
        let batch_size = self.config.batch_size.max(1);
        while !cancel.is_cancelled() {
            let batch = match self.claim(batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(kind = %self.kind(), error = %e, "Failed to claim items");
                    Vec::new()
                }
            };
            let full = batch.len() == batch_size;

            let mut pending = batch.into_iter();
            while let Some(entry) = pending.next() {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = tx.reserve() => permit.ok(),
                };
                match permit {
                    Some(permit) => permit.send(entry),
                    None => {
                        self.release(&entry.0, None).await;
                        for (item, _guard) in pending.by_ref() {
                            self.release(&item, None).await;
                        }
                    }
                }
            }

            if full {
                continue;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {
                    debug!(kind = %self.kind(), "Fetching on hint");
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn worker(
        self: Arc<Self>,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Claimed>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let next = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    entry = rx.recv() => entry,
                }
            };
            match next {
                Some((item, guard)) => self.process_item(item, guard).await,
                None => break,
            }
        }
    }

    async fn heartbeater(self: Arc<Self>, cancel: CancellationToken) {
        let period = (self.config.lease / 3).max(Duration::from_millis(10));
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => self.heartbeat().await,
            }
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Starts, stops and drains all pipelines.
pub struct PipelineManager {
    pipelines: Vec<Arc<Pipeline>>,
    hinter: PipelineHinter,
    cancel: CancellationToken,
    handles: Vec<(ResourceKind, JoinHandle<()>)>,
}

impl PipelineManager {
    /// Create a manager whose pipelines wake on `hinter`.
    pub fn new(hinter: PipelineHinter) -> Self {
        Self {
            pipelines: Vec::new(),
            hinter,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Hinter shared by the managed pipelines.
    pub fn hinter(&self) -> &PipelineHinter {
        &self.hinter
    }

    /// Add a pipeline. Must be called before [`start`](Self::start).
    pub fn add(&mut self, pipeline: Pipeline) {
        self.pipelines.push(Arc::new(pipeline));
    }

    /// Managed pipelines.
    pub fn pipelines(&self) -> &[Arc<Pipeline>] {
        &self.pipelines
    }

    /// Spawn every pipeline.
    pub fn start(&mut self) {
        for pipeline in &self.pipelines {
            let handle = pipeline.clone().spawn(self.cancel.child_token());
            self.handles.push((pipeline.kind(), handle));
        }
        info!(pipelines = self.handles.len(), "Pipelines started");
    }

    /// Signal every pipeline to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stop every pipeline and wait for in-flight work.
    ///
    /// A pipeline that panicked is logged; the others still drain.
    pub async fn drain(&mut self) {
        self.shutdown();
        for (kind, handle) in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(kind = %kind, error = %e, "Pipeline task panicked");
            }
        }
        info!("Pipelines drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_core::MemoryPersistence;
    use hangar_core::models::{Fleet, FleetStatus};
    use hangar_core::persistence::FleetUpdate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Terminates every fleet it sees, optionally failing or panicking first.
    struct CountingProcessor {
        calls: AtomicUsize,
        mode: Mode,
    }

    #[derive(PartialEq)]
    enum Mode {
        Terminate,
        Fail,
        Panic,
    }

    impl CountingProcessor {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                mode,
            })
        }
    }

    #[async_trait]
    impl PipelineProcessor for CountingProcessor {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Fleet
        }

        async fn process(&self, _item: &PipelineItem) -> Result<Option<ResourceUpdate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Terminate => Ok(Some(ResourceUpdate::Fleet(FleetUpdate {
                    status: Some(FleetStatus::Terminated),
                    deleted: false,
                }))),
                Mode::Fail => Err(crate::error::Error::Other("cloud API down".to_string())),
                Mode::Panic => panic!("processor bug"),
            }
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(20),
            min_processing_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    fn pipeline(persistence: Arc<MemoryPersistence>, processor: Arc<CountingProcessor>) -> Pipeline {
        Pipeline::new(
            processor,
            persistence,
            Arc::new(ResourceLocker::new()),
            &PipelineHinter::new(),
            config(),
        )
    }

    #[tokio::test]
    async fn test_process_one_applies_update_and_releases() {
        let persistence = Arc::new(MemoryPersistence::new());
        let fleet = Fleet::new("main", "train", true);
        persistence.create_fleet(&fleet).await.unwrap();
        let processor = CountingProcessor::new(Mode::Terminate);
        let pipeline = pipeline(persistence.clone(), processor.clone());

        assert_eq!(pipeline.process_one().await.unwrap(), Some(fleet.id));
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert!(pipeline.in_flight().is_empty());

        let stored = persistence.get_fleet(fleet.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FleetStatus::Terminated);
        assert!(stored.lease.lock_token.is_none());
        assert!(stored.lease.last_processed_at >= fleet.lease.last_processed_at);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_processors_still_release() {
        for mode in [Mode::Fail, Mode::Panic] {
            let persistence = Arc::new(MemoryPersistence::new());
            let fleet = Fleet::new("main", "train", true);
            persistence.create_fleet(&fleet).await.unwrap();
            let pipeline = pipeline(persistence.clone(), CountingProcessor::new(mode));

            assert_eq!(pipeline.process_one().await.unwrap(), Some(fleet.id));
            let stored = persistence.get_fleet(fleet.id).await.unwrap().unwrap();
            assert_eq!(stored.status, FleetStatus::Active);
            assert!(stored.lease.lock_token.is_none());
        }
    }

    #[tokio::test]
    async fn test_nothing_to_claim() {
        let persistence = Arc::new(MemoryPersistence::new());
        let pipeline = pipeline(persistence, CountingProcessor::new(Mode::Terminate));
        assert_eq!(pipeline.process_one().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hint_before_wait_is_not_lost() {
        let hinter = PipelineHinter::new();
        hinter.hint_fetch(ResourceKind::Volume);
        let notify = hinter.register(ResourceKind::Volume);
        tokio::time::timeout(Duration::from_millis(100), notify.notified())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_manager_processes_all_items_and_drains() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut fleets = Vec::new();
        for i in 0..25 {
            let fleet = Fleet::new("main", &format!("fleet-{i}"), true);
            persistence.create_fleet(&fleet).await.unwrap();
            fleets.push(fleet.id);
        }
        let processor = CountingProcessor::new(Mode::Terminate);
        let hinter = PipelineHinter::new();
        let mut manager = PipelineManager::new(hinter.clone());
        manager.add(Pipeline::new(
            processor.clone(),
            persistence.clone(),
            Arc::new(ResourceLocker::new()),
            &hinter,
            PipelineConfig {
                workers: 3,
                batch_size: 4,
                ..config()
            },
        ));
        manager.start();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let mut done = 0;
            for id in &fleets {
                let fleet = persistence.get_fleet(*id).await.unwrap().unwrap();
                if fleet.status == FleetStatus::Terminated {
                    done += 1;
                }
            }
            if done == fleets.len() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "pipeline stalled");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        manager.drain().await;
        for id in &fleets {
            let fleet = persistence.get_fleet(*id).await.unwrap().unwrap();
            assert!(fleet.lease.lock_token.is_none());
        }
        assert!(manager.pipelines()[0].in_flight().is_empty());
    }
}
