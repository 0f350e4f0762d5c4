// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pending job resubmission tests for hangar-server.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{Harness, create_project, mock, registry, retry_for_an_hour, submit_job};
use hangar_core::models::{BackendType, Job, JobStatus};
use hangar_core::{MemoryPersistence, Persistence};
use hangar_server::backends::InstanceState;
use hangar_server::resubmission::{ResubmissionConfig, ResubmissionTask};
use hangar_server::scheduler::ScheduleOutcome;

/// Store a PENDING job whose last transition happened `ago` in the past.
async fn pending_job(persistence: &MemoryPersistence, submission_num: i32, ago: Duration) -> Job {
    let mut job = submit_job(persistence, "main", retry_for_an_hour()).await;
    job.id = uuid::Uuid::new_v4();
    job.status = JobStatus::Pending;
    job.submission_num = submission_num;
    job.last_processed_at = Utc::now() - ago;
    persistence.create_job(&job).await.unwrap();
    job
}

fn task(persistence: Arc<MemoryPersistence>) -> ResubmissionTask {
    ResubmissionTask::new(persistence, ResubmissionConfig::default())
}

#[tokio::test]
async fn test_only_jobs_past_their_backoff_are_resubmitted() {
    let persistence = Arc::new(MemoryPersistence::new());
    create_project(persistence.as_ref(), "main", &[BackendType::Aws]).await;

    // First retry waits 15s, the third waits a minute
    let due = pending_job(&persistence, 0, Duration::seconds(20)).await;
    let early = pending_job(&persistence, 0, Duration::seconds(5)).await;
    let backing_off = pending_job(&persistence, 2, Duration::seconds(45)).await;

    assert_eq!(task(persistence.clone()).run_once().await.unwrap(), 1);

    let stored = persistence.get_job(due.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Submitted);
    assert_eq!(stored.submission_num, 1);
    assert!(stored.termination_reason.is_none());
    assert!(stored.submitted_at > due.submitted_at);

    for id in [early.id, backing_off.id] {
        let stored = persistence.get_job(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }

    // Nothing else is due yet
    assert_eq!(task(persistence.clone()).run_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_resubmitted_job_is_scheduled_again() {
    let persistence = Arc::new(MemoryPersistence::new());
    create_project(persistence.as_ref(), "main", &[BackendType::Aws]).await;
    let job = pending_job(&persistence, 1, Duration::seconds(31)).await;
    let aws = mock(BackendType::Aws, "m5.xlarge", 0.20);
    let h = Harness::new(persistence.clone(), registry(&[aws.clone()]));

    // The submitted original from the fixture is placed first
    h.scheduler.process_next().await.unwrap();

    assert_eq!(task(persistence.clone()).run_once().await.unwrap(), 1);
    let outcome = h.scheduler.process_next().await.unwrap();
    assert!(matches!(
        outcome,
        Some(ScheduleOutcome::Provisioned { job_id, .. }) if job_id == job.id
    ));

    let stored = h.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Provisioning);
    assert_eq!(stored.submission_num, 2);
    assert!(stored.job_name().ends_with("-0-2"));
}

#[tokio::test]
async fn test_full_retry_cycle_after_lost_instance() {
    let persistence = Arc::new(MemoryPersistence::new());
    create_project(persistence.as_ref(), "main", &[BackendType::Aws]).await;
    let job = submit_job(persistence.as_ref(), "main", retry_for_an_hour()).await;
    let aws = mock(BackendType::Aws, "m5.xlarge", 0.20);
    let h = Harness::new(persistence.clone(), registry(&[aws.clone()]));

    h.scheduler.process_next().await.unwrap();
    aws.set_instance_state("aws-1", InstanceState::Gone);
    h.monitor.process_next().await.unwrap();
    let pending = h.job(job.id).await;
    assert_eq!(pending.status, JobStatus::Pending);

    // Still backing off just before the first delay ends
    let resubmission = task(persistence.clone());
    let almost = pending.last_processed_at + Duration::seconds(14);
    assert_eq!(resubmission.run_once_at(almost).await.unwrap(), 0);
    assert_eq!(h.job(job.id).await.status, JobStatus::Pending);

    let due = pending.last_processed_at + Duration::seconds(15);
    assert_eq!(resubmission.run_once_at(due).await.unwrap(), 1);
    let resubmitted = h.job(job.id).await;
    assert_eq!(resubmitted.status, JobStatus::Submitted);
    assert_eq!(resubmitted.submission_num, 1);

    let outcome = h.scheduler.process_next().await.unwrap();
    assert!(matches!(
        outcome,
        Some(ScheduleOutcome::Provisioned { job_id, ref instance_id })
            if job_id == job.id && instance_id == "aws-2"
    ));

    aws.set_instance_state("aws-2", InstanceState::Running);
    h.monitor.process_next().await.unwrap();
    let running = h.job(job.id).await;
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.submission_num, 1);
    assert!(running.job_name().ends_with("-0-1"));
    assert_eq!(
        running.job_provisioning_data.unwrap().instance_id,
        "aws-2".to_string()
    );
}
