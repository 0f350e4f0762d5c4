// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process persistence.
//!
//! Every operation runs under one mutex, which gives the same atomicity as the
//! single-statement claims of the Postgres backend. Advisory locks are not
//! supported. Used by tests and single-node development.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Claim, JobProvisioned, JobUpdate, Persistence, ResourceUpdate};
use crate::error::CoreError;
use crate::locking::AdvisoryLocker;
use crate::models::{
    BackendConfig, BackendType, Fleet, Gateway, Instance, InstanceStatus, Job, JobStatus,
    JobTerminationReason, LeaseState, PipelineItem, PlacementGroup, Project, ResourceKind, Run,
    Volume,
};

#[derive(Default)]
struct State {
    projects: HashMap<String, Project>,
    backends: HashMap<(String, BackendType), BackendConfig>,
    runs: HashMap<Uuid, Run>,
    jobs: HashMap<Uuid, Job>,
    instances: HashMap<Uuid, Instance>,
    fleets: HashMap<Uuid, Fleet>,
    gateways: HashMap<Uuid, Gateway>,
    placement_groups: HashMap<Uuid, PlacementGroup>,
    volumes: HashMap<Uuid, Volume>,
}

impl State {
    fn lease_mut(&mut self, kind: ResourceKind, id: Uuid) -> Option<&mut LeaseState> {
        match kind {
            ResourceKind::Fleet => self.fleets.get_mut(&id).map(|r| &mut r.lease),
            ResourceKind::Gateway => self.gateways.get_mut(&id).map(|r| &mut r.lease),
            ResourceKind::PlacementGroup => {
                self.placement_groups.get_mut(&id).map(|r| &mut r.lease)
            }
            ResourceKind::Volume => self.volumes.get_mut(&id).map(|r| &mut r.lease),
        }
    }

    fn leases(&self, kind: ResourceKind) -> Vec<(Uuid, &LeaseState)> {
        match kind {
            ResourceKind::Fleet => self.fleets.values().map(|r| (r.id, &r.lease)).collect(),
            ResourceKind::Gateway => self.gateways.values().map(|r| (r.id, &r.lease)).collect(),
            ResourceKind::PlacementGroup => self
                .placement_groups
                .values()
                .map(|r| (r.id, &r.lease))
                .collect(),
            ResourceKind::Volume => self.volumes.values().map(|r| (r.id, &r.lease)).collect(),
        }
    }

    fn apply(&mut self, id: Uuid, update: &ResourceUpdate) {
        match update {
            ResourceUpdate::Fleet(u) => {
                if let Some(fleet) = self.fleets.get_mut(&id) {
                    if let Some(status) = u.status {
                        fleet.status = status;
                    }
                    fleet.lease.deleted |= u.deleted;
                }
            }
            ResourceUpdate::Gateway(u) => {
                if let Some(gw) = self.gateways.get_mut(&id) {
                    if let Some(status) = u.status {
                        gw.status = status;
                    }
                    if u.status_message.is_some() {
                        gw.status_message = u.status_message.clone();
                    }
                    if u.provisioning_data.is_some() {
                        gw.provisioning_data = u.provisioning_data.clone();
                    }
                    gw.lease.deleted |= u.deleted;
                }
            }
            ResourceUpdate::PlacementGroup(u) => {
                if let Some(pg) = self.placement_groups.get_mut(&id) {
                    pg.lease.deleted |= u.deleted;
                }
            }
            ResourceUpdate::Volume(u) => {
                if let Some(vol) = self.volumes.get_mut(&id) {
                    if let Some(status) = u.status {
                        vol.status = status;
                    }
                    if u.status_message.is_some() {
                        vol.status_message = u.status_message.clone();
                    }
                    if u.provisioning_data.is_some() {
                        vol.provisioning_data = u.provisioning_data.clone();
                    }
                    vol.lease.deleted |= u.deleted;
                }
            }
        }
    }

    fn owned_job(&mut self, job_id: Uuid, lock_token: Uuid) -> Option<&mut Job> {
        self.jobs
            .get_mut(&job_id)
            .filter(|j| j.lock_token == Some(lock_token))
    }
}

fn job_is_claimable(job: &Job, now: DateTime<Utc>) -> bool {
    !job.deleted
        && match (job.lock_token, job.lock_expires_at) {
            (None, _) => true,
            (Some(_), Some(expires)) => expires < now,
            (Some(_), None) => true,
        }
}

fn clear_job_lease(job: &mut Job) {
    job.lock_token = None;
    job.lock_expires_at = None;
    job.last_processed_at = Utc::now();
}

/// Persistence kept entirely in process memory.
#[derive(Default)]
pub struct MemoryPersistence {
    state: Mutex<State>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn insert_unique<V>(
    map: &mut HashMap<Uuid, V>,
    kind: &'static str,
    id: Uuid,
    value: V,
) -> Result<(), CoreError> {
    if map.contains_key(&id) {
        return Err(CoreError::AlreadyExists {
            kind,
            id: id.to_string(),
        });
    }
    map.insert(id, value);
    Ok(())
}

#[async_trait]
impl Persistence for MemoryPersistence {
    fn advisory_locker(&self) -> AdvisoryLocker {
        AdvisoryLocker::Unsupported
    }

    async fn create_project(&self, project: &Project) -> Result<(), CoreError> {
        let mut state = self.state();
        if state.projects.contains_key(&project.name) {
            return Err(CoreError::AlreadyExists {
                kind: "project",
                id: project.name.clone(),
            });
        }
        state.projects.insert(project.name.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, name: &str) -> Result<Option<Project>, CoreError> {
        Ok(self.state().projects.get(name).cloned())
    }

    async fn set_project_backend(&self, backend: &BackendConfig) -> Result<(), CoreError> {
        let mut state = self.state();
        if !state.projects.contains_key(&backend.project_name) {
            return Err(CoreError::not_found("project", &backend.project_name));
        }
        state.backends.insert(
            (backend.project_name.clone(), backend.backend_type),
            backend.clone(),
        );
        Ok(())
    }

    async fn list_project_backends(
        &self,
        project_name: &str,
    ) -> Result<Vec<BackendConfig>, CoreError> {
        let mut backends: Vec<BackendConfig> = self
            .state()
            .backends
            .values()
            .filter(|b| b.project_name == project_name)
            .cloned()
            .collect();
        backends.sort_by_key(|b| b.backend_type.as_str());
        Ok(backends)
    }

    async fn create_run(&self, run: &Run) -> Result<(), CoreError> {
        insert_unique(&mut self.state().runs, "run", run.id, run.clone())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, CoreError> {
        Ok(self.state().runs.get(&id).cloned())
    }

    async fn create_job(&self, job: &Job) -> Result<(), CoreError> {
        insert_unique(&mut self.state().jobs, "job", job.id, job.clone())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, CoreError> {
        Ok(self.state().jobs.get(&id).cloned())
    }

    async fn claim_job(
        &self,
        statuses: &[JobStatus],
        claim: &Claim<'_>,
    ) -> Result<Option<Job>, CoreError> {
        let now = Utc::now();
        let mut state = self.state();
        let candidate = state
            .jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .filter(|j| job_is_claimable(j, now))
            .filter(|j| !claim.exclude.contains(&j.id))
            .filter(|j| j.last_processed_at <= claim.processed_before)
            .min_by_key(|j| (j.last_processed_at, j.id))
            .map(|j| j.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.lock_token = Some(claim.lock_token);
        job.lock_expires_at = Some(claim.lock_expires_at);
        Ok(Some(job.clone()))
    }

    async fn release_job(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        update: &JobUpdate,
    ) -> Result<bool, CoreError> {
        let mut state = self.state();
        let Some(job) = state.owned_job(job_id, lock_token) else {
            return Ok(false);
        };

        if let Some(status) = update.status {
            job.status = status;
        }
        if update.termination_reason.is_some() {
            job.termination_reason = update.termination_reason;
        }
        if update.termination_message.is_some() {
            job.termination_message = update.termination_message.clone();
        }
        let instance_id = job.instance_id;
        if update.clear_provisioning {
            job.job_provisioning_data = None;
            job.instance_id = None;
        }
        clear_job_lease(job);

        if let (Some(status), Some(instance_id)) = (update.instance_status, instance_id) {
            if let Some(instance) = state.instances.get_mut(&instance_id) {
                instance.status = status;
            }
        }
        Ok(true)
    }

    async fn extend_job_lease(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        lock_expires_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut state = self.state();
        let Some(job) = state.owned_job(job_id, lock_token) else {
            return Ok(false);
        };
        job.lock_expires_at = Some(lock_expires_at);
        Ok(true)
    }

    async fn record_job_provisioned(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        provisioned: &JobProvisioned,
    ) -> Result<bool, CoreError> {
        let mut state = self.state();
        let Some(job) = state.owned_job(job_id, lock_token) else {
            return Ok(false);
        };

        job.status = JobStatus::Provisioning;
        job.job_provisioning_data = Some(provisioned.provisioning_data.clone());
        job.instance_id = Some(provisioned.instance.id);
        job.fleet_id = provisioned.instance.fleet_id;
        clear_job_lease(job);

        if let Some(fleet) = &provisioned.new_fleet {
            state.fleets.insert(fleet.id, fleet.clone());
        }
        state
            .instances
            .insert(provisioned.instance.id, provisioned.instance.clone());
        Ok(true)
    }

    async fn request_job_termination(
        &self,
        job_id: Uuid,
        reason: JobTerminationReason,
        message: Option<&str>,
    ) -> Result<bool, CoreError> {
        let mut state = self.state();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::not_found("job", job_id))?;
        if job.status.is_finished() {
            return Ok(false);
        }

        job.status = match job.status {
            JobStatus::Submitted | JobStatus::Pending => reason.to_status(),
            _ => JobStatus::Terminating,
        };
        job.termination_reason = Some(reason);
        job.termination_message = message.map(str::to_string);
        Ok(true)
    }

    async fn list_pending_jobs(&self) -> Result<Vec<Job>, CoreError> {
        let mut jobs: Vec<Job> = self
            .state()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && !j.deleted)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.last_processed_at);
        Ok(jobs)
    }

    async fn resubmit_job(&self, job_id: Uuid) -> Result<bool, CoreError> {
        let mut state = self.state();
        let Some(job) = state
            .jobs
            .get_mut(&job_id)
            .filter(|j| j.status == JobStatus::Pending && !j.deleted)
        else {
            return Ok(false);
        };

        let now = Utc::now();
        job.status = JobStatus::Submitted;
        job.submission_num += 1;
        job.submitted_at = now;
        job.last_processed_at = now;
        job.termination_reason = None;
        job.termination_message = None;
        Ok(true)
    }

    async fn create_instance(&self, instance: &Instance) -> Result<(), CoreError> {
        insert_unique(
            &mut self.state().instances,
            "instance",
            instance.id,
            instance.clone(),
        )
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<Instance>, CoreError> {
        Ok(self.state().instances.get(&id).cloned())
    }

    async fn list_fleet_instances(&self, fleet_id: Uuid) -> Result<Vec<Instance>, CoreError> {
        let mut instances: Vec<Instance> = self
            .state()
            .instances
            .values()
            .filter(|i| i.fleet_id == Some(fleet_id) && !i.deleted)
            .cloned()
            .collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    async fn set_instance_status(
        &self,
        id: Uuid,
        status: InstanceStatus,
    ) -> Result<(), CoreError> {
        let mut state = self.state();
        let instance = state
            .instances
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("instance", id))?;
        instance.status = status;
        Ok(())
    }

    async fn create_fleet(&self, fleet: &Fleet) -> Result<(), CoreError> {
        insert_unique(&mut self.state().fleets, "fleet", fleet.id, fleet.clone())
    }

    async fn get_fleet(&self, id: Uuid) -> Result<Option<Fleet>, CoreError> {
        Ok(self.state().fleets.get(&id).cloned())
    }

    async fn create_gateway(&self, gateway: &Gateway) -> Result<(), CoreError> {
        insert_unique(
            &mut self.state().gateways,
            "gateway",
            gateway.id,
            gateway.clone(),
        )
    }

    async fn get_gateway(&self, id: Uuid) -> Result<Option<Gateway>, CoreError> {
        Ok(self.state().gateways.get(&id).cloned())
    }

    async fn create_placement_group(&self, group: &PlacementGroup) -> Result<(), CoreError> {
        insert_unique(
            &mut self.state().placement_groups,
            "placement group",
            group.id,
            group.clone(),
        )
    }

    async fn get_placement_group(&self, id: Uuid) -> Result<Option<PlacementGroup>, CoreError> {
        Ok(self.state().placement_groups.get(&id).cloned())
    }

    async fn create_volume(&self, volume: &Volume) -> Result<(), CoreError> {
        insert_unique(
            &mut self.state().volumes,
            "volume",
            volume.id,
            volume.clone(),
        )
    }

    async fn get_volume(&self, id: Uuid) -> Result<Option<Volume>, CoreError> {
        Ok(self.state().volumes.get(&id).cloned())
    }

    async fn claim_items(
        &self,
        kind: ResourceKind,
        claim: &Claim<'_>,
        limit: usize,
    ) -> Result<Vec<PipelineItem>, CoreError> {
        let now = Utc::now();
        let mut state = self.state();

        let mut candidates: Vec<(DateTime<Utc>, Uuid)> = state
            .leases(kind)
            .into_iter()
            .filter(|(id, lease)| lease.is_claimable(now) && !claim.exclude.contains(id))
            .filter(|(_, lease)| lease.last_processed_at <= claim.processed_before)
            .map(|(id, lease)| (lease.last_processed_at, id))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut items = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            let Some(lease) = state.lease_mut(kind, id) else {
                continue;
            };
            let prev_lock_expired = lease.lock_token.is_some();
            lease.lock_token = Some(claim.lock_token);
            lease.lock_expires_at = Some(claim.lock_expires_at);
            items.push(PipelineItem {
                kind,
                id,
                lock_token: claim.lock_token,
                lock_expires_at: claim.lock_expires_at,
                prev_lock_expired,
            });
        }
        Ok(items)
    }

    async fn extend_leases(
        &self,
        items: &[PipelineItem],
        lock_expires_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, CoreError> {
        let mut state = self.state();
        let mut extended = Vec::new();
        for item in items {
            if let Some(lease) = state
                .lease_mut(item.kind, item.id)
                .filter(|l| l.lock_token == Some(item.lock_token))
            {
                lease.lock_expires_at = Some(lock_expires_at);
                extended.push(item.id);
            }
        }
        Ok(extended)
    }

    async fn release_item(
        &self,
        item: &PipelineItem,
        update: Option<&ResourceUpdate>,
    ) -> Result<bool, CoreError> {
        if let Some(update) = update {
            update.check_kind(item)?;
        }

        let mut state = self.state();
        match state.lease_mut(item.kind, item.id) {
            Some(lease) if lease.lock_token == Some(item.lock_token) => {
                lease.lock_token = None;
                lease.lock_expires_at = None;
                lease.last_processed_at = Utc::now();
            }
            _ => return Ok(false),
        }
        if let Some(update) = update {
            state.apply(item.id, update);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FleetStatus, Requirements};
    use crate::persistence::FleetUpdate;
    use chrono::Duration;
    use std::sync::Arc;

    fn lease() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }

    async fn seeded_job(store: &MemoryPersistence) -> Job {
        let run = Run {
            id: Uuid::new_v4(),
            project_name: "main".to_string(),
            run_name: "train".to_string(),
            user_name: "admin".to_string(),
            submitted_at: Utc::now(),
        };
        store.create_run(&run).await.unwrap();
        let job = Job::new(&run, 0, Requirements::default());
        store.create_job(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_claim_and_release_job() {
        let store = MemoryPersistence::new();
        let job = seeded_job(&store).await;

        let claim = Claim::new(lease(), &[]);
        let claimed = store
            .claim_job(&[JobStatus::Submitted], &claim)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.lock_token, Some(claim.lock_token));

        let again = Claim::new(lease(), &[]);
        assert!(
            store
                .claim_job(&[JobStatus::Submitted], &again)
                .await
                .unwrap()
                .is_none()
        );

        assert!(
            !store
                .release_job(job.id, again.lock_token, &JobUpdate::default())
                .await
                .unwrap()
        );
        assert!(
            store
                .release_job(job.id, claim.lock_token, &JobUpdate::status(JobStatus::Failed))
                .await
                .unwrap()
        );

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.lock_token.is_none());
    }

    #[tokio::test]
    async fn test_extend_job_lease_requires_owner() {
        let store = MemoryPersistence::new();
        let job = seeded_job(&store).await;
        let claim = Claim::new(lease(), &[]);
        store
            .claim_job(&[JobStatus::Submitted], &claim)
            .await
            .unwrap()
            .unwrap();

        let later = Utc::now() + Duration::minutes(10);
        assert!(store.extend_job_lease(job.id, claim.lock_token, later).await.unwrap());
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.lock_expires_at, Some(later));

        assert!(
            !store
                .extend_job_lease(job.id, Uuid::new_v4(), later)
                .await
                .unwrap()
        );
        store
            .release_job(job.id, claim.lock_token, &JobUpdate::default())
            .await
            .unwrap();
        assert!(!store.extend_job_lease(job.id, claim.lock_token, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_job_respects_exclude() {
        let store = MemoryPersistence::new();
        let job = seeded_job(&store).await;
        let exclude = [job.id];
        let claim = Claim::new(lease(), &exclude);
        assert!(
            store
                .claim_job(&[JobStatus::Submitted], &claim)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_item_claims_yield_one_winner() {
        let store = Arc::new(MemoryPersistence::new());
        let fleet = Fleet::new("main", "f", false);
        store.create_fleet(&fleet).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let claim = Claim::new(lease(), &[]);
                store.claim_item(ResourceKind::Fleet, &claim).await.unwrap()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let store = MemoryPersistence::new();
        let mut fleet = Fleet::new("main", "f", false);
        fleet.lease.lock_token = Some(Uuid::new_v4());
        fleet.lease.lock_expires_at = Some(Utc::now() - Duration::seconds(5));
        store.create_fleet(&fleet).await.unwrap();

        let claim = Claim::new(lease(), &[]);
        let item = store
            .claim_item(ResourceKind::Fleet, &claim)
            .await
            .unwrap()
            .unwrap();
        assert!(item.prev_lock_expired);
        assert_eq!(item.table_name(), "fleets");

        let update = ResourceUpdate::Fleet(FleetUpdate {
            status: Some(FleetStatus::Terminated),
            deleted: true,
        });
        assert!(store.release_item(&item, Some(&update)).await.unwrap());

        let stored = store.get_fleet(fleet.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FleetStatus::Terminated);
        assert!(stored.lease.deleted);
        assert!(stored.lease.lock_token.is_none());

        // Deleted rows are never claimed again.
        let claim = Claim::new(lease(), &[]);
        assert!(
            store
                .claim_item(ResourceKind::Fleet, &claim)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_release_with_lost_lease_discards_update() {
        let store = MemoryPersistence::new();
        let fleet = Fleet::new("main", "f", false);
        store.create_fleet(&fleet).await.unwrap();

        let claim = Claim::new(lease(), &[]);
        let mut item = store
            .claim_item(ResourceKind::Fleet, &claim)
            .await
            .unwrap()
            .unwrap();
        item.lock_token = Uuid::new_v4();

        let update = ResourceUpdate::Fleet(FleetUpdate {
            status: None,
            deleted: true,
        });
        assert!(!store.release_item(&item, Some(&update)).await.unwrap());
        assert!(!store.get_fleet(fleet.id).await.unwrap().unwrap().lease.deleted);
    }

    #[tokio::test]
    async fn test_claim_order_and_min_interval() {
        let store = MemoryPersistence::new();
        let mut old = Fleet::new("main", "old", false);
        old.lease.last_processed_at = Utc::now() - Duration::minutes(10);
        let mut fresh = Fleet::new("main", "fresh", false);
        fresh.lease.last_processed_at = Utc::now() - Duration::seconds(1);
        store.create_fleet(&fresh).await.unwrap();
        store.create_fleet(&old).await.unwrap();

        let claim = Claim::new(lease(), &[]).min_processing_interval(std::time::Duration::from_secs(60));
        let items = store
            .claim_items(ResourceKind::Fleet, &claim, 10)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, old.id);
    }

    #[tokio::test]
    async fn test_extend_leases_only_for_owned_items() {
        let store = MemoryPersistence::new();
        let fleet = Fleet::new("main", "f", false);
        store.create_fleet(&fleet).await.unwrap();

        let claim = Claim::new(lease(), &[]);
        let item = store
            .claim_item(ResourceKind::Fleet, &claim)
            .await
            .unwrap()
            .unwrap();
        let mut stranger = item.clone();
        stranger.lock_token = Uuid::new_v4();

        let until = Utc::now() + Duration::minutes(5);
        let extended = store.extend_leases(&[item, stranger], until).await.unwrap();
        assert_eq!(extended, vec![fleet.id]);
        assert_eq!(
            store
                .get_fleet(fleet.id)
                .await
                .unwrap()
                .unwrap()
                .lease
                .lock_expires_at,
            Some(until)
        );
    }

    #[tokio::test]
    async fn test_resubmit_and_terminate() {
        let store = MemoryPersistence::new();
        let job = seeded_job(&store).await;
        assert!(!store.resubmit_job(job.id).await.unwrap());

        let claim = Claim::new(lease(), &[]);
        store
            .claim_job(&[JobStatus::Submitted], &claim)
            .await
            .unwrap();
        store
            .release_job(job.id, claim.lock_token, &JobUpdate::status(JobStatus::Pending))
            .await
            .unwrap();

        assert_eq!(store.list_pending_jobs().await.unwrap().len(), 1);
        assert!(store.resubmit_job(job.id).await.unwrap());
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Submitted);
        assert_eq!(stored.submission_num, 1);

        assert!(
            store
                .request_job_termination(job.id, JobTerminationReason::TerminatedByUser, None)
                .await
                .unwrap()
        );
        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Terminated);
        assert!(
            !store
                .request_job_termination(job.id, JobTerminationReason::TerminatedByUser, None)
                .await
                .unwrap()
        );
    }
}
