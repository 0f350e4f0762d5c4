// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry and resubmission policy for jobs that failed to start or lost their instance.
//!
//! A job is eligible for resubmission while its retry budget, counted from
//! `created_at`, has not elapsed. The budget is never extended: every
//! resubmission re-evaluates against the same `created_at`.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Job, JobStatus, JobTerminationReason};

/// Default retry budget (one hour).
pub const DEFAULT_RETRY_DURATION_SECS: u64 = 3600;

/// Returns true if `job` may be moved back to PENDING at `now`.
pub fn is_resubmission_eligible(job: &Job, now: DateTime<Utc>) -> bool {
    let Some(policy) = &job.retry_policy else {
        return false;
    };
    policy.retry && now - job.created_at < policy.budget()
}

/// What to do with a job that needs resubmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResubmissionDecision {
    /// Move to PENDING for another provisioning attempt.
    Resubmit,
    /// Move to FAILED with the given reason.
    Fail(JobTerminationReason),
}

impl ResubmissionDecision {
    /// Status the job transitions to.
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Resubmit => JobStatus::Pending,
            Self::Fail(_) => JobStatus::Failed,
        }
    }
}

/// Decides the fate of `job`, failing with `reason` once the budget is spent.
pub fn decide(
    job: &Job,
    reason: JobTerminationReason,
    now: DateTime<Utc>,
) -> ResubmissionDecision {
    if is_resubmission_eligible(job, now) {
        ResubmissionDecision::Resubmit
    } else {
        ResubmissionDecision::Fail(reason)
    }
}

/// Delay before a PENDING job with `submission_num` prior submissions is resubmitted.
pub fn pending_retry_delay(submission_num: i32) -> Duration {
    match submission_num {
        i32::MIN..=1 => Duration::seconds(15),
        2 => Duration::seconds(30),
        3 => Duration::minutes(1),
        4 => Duration::minutes(2),
        5 => Duration::minutes(5),
        _ => Duration::minutes(10),
    }
}

/// Whether a PENDING job is due for resubmission at `now`.
pub fn is_due_for_resubmission(job: &Job, now: DateTime<Utc>) -> bool {
    job.status == JobStatus::Pending
        && now - job.last_processed_at >= pending_retry_delay(job.submission_num + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Requirements, RetryPolicy, Run};
    use uuid::Uuid;

    fn job_created(ago: Duration, policy: Option<RetryPolicy>) -> (Job, DateTime<Utc>) {
        let now = Utc::now();
        let run = Run {
            id: Uuid::new_v4(),
            project_name: "main".to_string(),
            run_name: "train".to_string(),
            user_name: "admin".to_string(),
            submitted_at: now - ago,
        };
        let mut job = Job::new(&run, 0, Requirements::default());
        job.created_at = now - ago;
        job.retry_policy = policy;
        (job, now)
    }

    fn policy(retry: bool, duration: u64) -> Option<RetryPolicy> {
        Some(RetryPolicy { retry, duration })
    }

    #[test]
    fn test_no_policy_never_eligible() {
        let (job, now) = job_created(Duration::seconds(1), None);
        assert!(!is_resubmission_eligible(&job, now));
    }

    #[test]
    fn test_retry_false_never_eligible() {
        for ago in [0, 1, 60, 3599, 3600, 86400] {
            let (job, now) = job_created(Duration::seconds(ago), policy(false, 3600));
            assert!(!is_resubmission_eligible(&job, now), "elapsed {ago}s");
        }
    }

    #[test]
    fn test_budget_boundary() {
        let eps = Duration::milliseconds(1);
        let (job, now) = job_created(Duration::seconds(3600) - eps, policy(true, 3600));
        assert!(is_resubmission_eligible(&job, now));

        let (job, now) = job_created(Duration::seconds(3600), policy(true, 3600));
        assert!(!is_resubmission_eligible(&job, now));

        let (job, now) = job_created(Duration::seconds(3600) + eps, policy(true, 3600));
        assert!(!is_resubmission_eligible(&job, now));
    }

    #[test]
    fn test_decide() {
        let (young, now) = job_created(Duration::minutes(10), policy(true, 3600));
        assert_eq!(
            decide(&young, JobTerminationReason::InstanceUnreachable, now),
            ResubmissionDecision::Resubmit
        );

        let (old, now) = job_created(Duration::hours(2), policy(true, 3600));
        let decision = decide(&old, JobTerminationReason::InstanceUnreachable, now);
        assert_eq!(
            decision,
            ResubmissionDecision::Fail(JobTerminationReason::InstanceUnreachable)
        );
        assert_eq!(decision.status(), JobStatus::Failed);
    }

    #[test]
    fn test_pending_retry_delay_table() {
        assert_eq!(pending_retry_delay(0), Duration::seconds(15));
        assert_eq!(pending_retry_delay(1), Duration::seconds(15));
        assert_eq!(pending_retry_delay(2), Duration::seconds(30));
        assert_eq!(pending_retry_delay(3), Duration::minutes(1));
        assert_eq!(pending_retry_delay(4), Duration::minutes(2));
        assert_eq!(pending_retry_delay(5), Duration::minutes(5));
        assert_eq!(pending_retry_delay(6), Duration::minutes(10));
        assert_eq!(pending_retry_delay(100), Duration::minutes(10));
    }

    #[test]
    fn test_due_for_resubmission() {
        let (mut job, now) = job_created(Duration::minutes(5), policy(true, 3600));
        job.status = JobStatus::Pending;
        job.last_processed_at = now - Duration::seconds(10);
        assert!(!is_due_for_resubmission(&job, now));

        job.last_processed_at = now - Duration::seconds(15);
        assert!(is_due_for_resubmission(&job, now));

        job.status = JobStatus::Failed;
        assert!(!is_due_for_resubmission(&job, now));
    }
}
