// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence for hangar-core.
//!
//! Claims are one statement: a `FOR UPDATE SKIP LOCKED` CTE picks the rows and
//! the surrounding `UPDATE ... RETURNING` writes the lease. Releases are
//! conditioned on the lease token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use super::{Claim, JobProvisioned, JobUpdate, Persistence, ResourceUpdate};
use crate::error::CoreError;
use crate::locking::AdvisoryLocker;
use crate::models::{
    BackendConfig, Fleet, Gateway, Instance, InstanceStatus, Job, JobStatus,
    JobTerminationReason, LeaseState, PipelineItem, PlacementGroup, Project, Requirements,
    ResourceKind, Run, Volume,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const CLAIMABLE: &str =
    "deleted = FALSE AND (lock_token IS NULL OR lock_expires_at IS NULL OR lock_expires_at < NOW())";

// ============================================================================
// Row decoding
// ============================================================================

fn parse<T: std::str::FromStr<Err = CoreError>>(row: &PgRow, col: &str) -> Result<T, CoreError> {
    let raw: String = row.try_get(col)?;
    raw.parse()
}

fn parse_opt<T: std::str::FromStr<Err = CoreError>>(
    row: &PgRow,
    col: &str,
) -> Result<Option<T>, CoreError> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| s.parse()).transpose()
}

fn json_opt<T: serde::de::DeserializeOwned>(
    row: &PgRow,
    col: &str,
) -> Result<Option<T>, CoreError> {
    let value: Option<Json<T>> = row.try_get(col)?;
    Ok(value.map(|j| j.0))
}

fn lease_from_row(row: &PgRow) -> Result<LeaseState, CoreError> {
    Ok(LeaseState {
        deleted: row.try_get("deleted")?,
        last_processed_at: row.try_get("last_processed_at")?,
        lock_token: row.try_get("lock_token")?,
        lock_expires_at: row.try_get("lock_expires_at")?,
    })
}

fn project_from_row(row: &PgRow) -> Result<Project, CoreError> {
    Ok(Project {
        name: row.try_get("name")?,
        ssh_public_key: row.try_get("ssh_public_key")?,
        ssh_private_key: row.try_get("ssh_private_key")?,
        created_at: row.try_get("created_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<Run, CoreError> {
    Ok(Run {
        id: row.try_get("id")?,
        project_name: row.try_get("project_name")?,
        run_name: row.try_get("run_name")?,
        user_name: row.try_get("user_name")?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job, CoreError> {
    let requirements: Json<Requirements> = row.try_get("requirements")?;
    Ok(Job {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        project_name: row.try_get("project_name")?,
        run_name: row.try_get("run_name")?,
        job_num: row.try_get("job_num")?,
        submission_num: row.try_get("submission_num")?,
        status: parse(row, "status")?,
        termination_reason: parse_opt(row, "termination_reason")?,
        termination_message: row.try_get("termination_message")?,
        requirements: requirements.0,
        retry_policy: json_opt(row, "retry_policy")?,
        job_provisioning_data: json_opt(row, "job_provisioning_data")?,
        fleet_id: row.try_get("fleet_id")?,
        instance_id: row.try_get("instance_id")?,
        deleted: row.try_get("deleted")?,
        created_at: row.try_get("created_at")?,
        submitted_at: row.try_get("submitted_at")?,
        last_processed_at: row.try_get("last_processed_at")?,
        lock_token: row.try_get("lock_token")?,
        lock_expires_at: row.try_get("lock_expires_at")?,
    })
}

fn instance_from_row(row: &PgRow) -> Result<Instance, CoreError> {
    Ok(Instance {
        id: row.try_get("id")?,
        fleet_id: row.try_get("fleet_id")?,
        project_name: row.try_get("project_name")?,
        name: row.try_get("name")?,
        backend: parse(row, "backend")?,
        region: row.try_get("region")?,
        instance_id: row.try_get("instance_id")?,
        backend_data: row.try_get("backend_data")?,
        price: row.try_get("price")?,
        status: parse(row, "status")?,
        job_id: row.try_get("job_id")?,
        deleted: row.try_get("deleted")?,
        created_at: row.try_get("created_at")?,
    })
}

fn fleet_from_row(row: &PgRow) -> Result<Fleet, CoreError> {
    Ok(Fleet {
        id: row.try_get("id")?,
        project_name: row.try_get("project_name")?,
        name: row.try_get("name")?,
        status: parse(row, "status")?,
        autocreated: row.try_get("autocreated")?,
        created_at: row.try_get("created_at")?,
        lease: lease_from_row(row)?,
    })
}

fn gateway_from_row(row: &PgRow) -> Result<Gateway, CoreError> {
    Ok(Gateway {
        id: row.try_get("id")?,
        project_name: row.try_get("project_name")?,
        name: row.try_get("name")?,
        backend: parse(row, "backend")?,
        region: row.try_get("region")?,
        status: parse(row, "status")?,
        status_message: row.try_get("status_message")?,
        provisioning_data: json_opt(row, "provisioning_data")?,
        to_be_deleted: row.try_get("to_be_deleted")?,
        created_at: row.try_get("created_at")?,
        lease: lease_from_row(row)?,
    })
}

fn placement_group_from_row(row: &PgRow) -> Result<PlacementGroup, CoreError> {
    Ok(PlacementGroup {
        id: row.try_get("id")?,
        project_name: row.try_get("project_name")?,
        name: row.try_get("name")?,
        fleet_id: row.try_get("fleet_id")?,
        backend: parse(row, "backend")?,
        region: row.try_get("region")?,
        backend_data: row.try_get("backend_data")?,
        to_be_deleted: row.try_get("to_be_deleted")?,
        created_at: row.try_get("created_at")?,
        lease: lease_from_row(row)?,
    })
}

fn volume_from_row(row: &PgRow) -> Result<Volume, CoreError> {
    let size_gb: Option<i32> = row.try_get("size_gb")?;
    Ok(Volume {
        id: row.try_get("id")?,
        project_name: row.try_get("project_name")?,
        name: row.try_get("name")?,
        backend: parse(row, "backend")?,
        region: row.try_get("region")?,
        size_gb: size_gb.and_then(|s| u32::try_from(s).ok()),
        external_volume_id: row.try_get("external_volume_id")?,
        status: parse(row, "status")?,
        status_message: row.try_get("status_message")?,
        provisioning_data: json_opt(row, "provisioning_data")?,
        to_be_deleted: row.try_get("to_be_deleted")?,
        created_at: row.try_get("created_at")?,
        lease: lease_from_row(row)?,
    })
}

// ============================================================================
// Inserts shared with transactions
// ============================================================================

async fn insert_fleet<'e>(executor: impl PgExecutor<'e>, fleet: &Fleet) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO fleets (id, project_name, name, status, autocreated, created_at,
                            deleted, last_processed_at, lock_token, lock_expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(fleet.id)
    .bind(&fleet.project_name)
    .bind(&fleet.name)
    .bind(fleet.status.as_str())
    .bind(fleet.autocreated)
    .bind(fleet.created_at)
    .bind(fleet.lease.deleted)
    .bind(fleet.lease.last_processed_at)
    .bind(fleet.lease.lock_token)
    .bind(fleet.lease.lock_expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_instance<'e>(
    executor: impl PgExecutor<'e>,
    instance: &Instance,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO instances (id, fleet_id, project_name, name, backend, region, instance_id,
                               backend_data, price, status, job_id, deleted, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(instance.id)
    .bind(instance.fleet_id)
    .bind(&instance.project_name)
    .bind(&instance.name)
    .bind(instance.backend.as_str())
    .bind(&instance.region)
    .bind(&instance.instance_id)
    .bind(&instance.backend_data)
    .bind(instance.price)
    .bind(instance.status.as_str())
    .bind(instance.job_id)
    .bind(instance.deleted)
    .bind(instance.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

fn map_unique(err: sqlx::Error, kind: &'static str, id: impl ToString) -> CoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => CoreError::AlreadyExists {
            kind,
            id: id.to_string(),
        },
        _ => err.into(),
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    fn advisory_locker(&self) -> AdvisoryLocker {
        AdvisoryLocker::Postgres(self.pool.clone())
    }

    // ========================================================================
    // Projects
    // ========================================================================

    async fn create_project(&self, project: &Project) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO projects (name, ssh_public_key, ssh_private_key, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&project.name)
        .bind(&project.ssh_public_key)
        .bind(&project.ssh_private_key)
        .bind(project.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "project", &project.name))?;
        Ok(())
    }

    async fn get_project(&self, name: &str) -> Result<Option<Project>, CoreError> {
        let row = sqlx::query("SELECT * FROM projects WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn set_project_backend(&self, backend: &BackendConfig) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO project_backends (project_name, backend_type, config)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_name, backend_type) DO UPDATE SET config = EXCLUDED.config
            "#,
        )
        .bind(&backend.project_name)
        .bind(backend.backend_type.as_str())
        .bind(Json(&backend.config))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_project_backends(
        &self,
        project_name: &str,
    ) -> Result<Vec<BackendConfig>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT project_name, backend_type, config FROM project_backends
            WHERE project_name = $1
            ORDER BY backend_type
            "#,
        )
        .bind(project_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let config: Json<serde_json::Value> = row.try_get("config")?;
                Ok(BackendConfig {
                    project_name: row.try_get("project_name")?,
                    backend_type: parse(row, "backend_type")?,
                    config: config.0,
                })
            })
            .collect()
    }

    // ========================================================================
    // Runs and jobs
    // ========================================================================

    async fn create_run(&self, run: &Run) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, project_name, run_name, user_name, submitted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run.id)
        .bind(&run.project_name)
        .bind(&run.run_name)
        .bind(&run.user_name)
        .bind(run.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "run", run.id))?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, CoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn create_job(&self, job: &Job) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, run_id, project_name, run_name, job_num, submission_num,
                              status, termination_reason, termination_message, requirements,
                              retry_policy, job_provisioning_data, fleet_id, instance_id,
                              deleted, created_at, submitted_at, last_processed_at,
                              lock_token, lock_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(job.id)
        .bind(job.run_id)
        .bind(&job.project_name)
        .bind(&job.run_name)
        .bind(job.job_num)
        .bind(job.submission_num)
        .bind(job.status.as_str())
        .bind(job.termination_reason.map(|r| r.as_str()))
        .bind(&job.termination_message)
        .bind(Json(&job.requirements))
        .bind(job.retry_policy.as_ref().map(Json))
        .bind(job.job_provisioning_data.as_ref().map(Json))
        .bind(job.fleet_id)
        .bind(job.instance_id)
        .bind(job.deleted)
        .bind(job.created_at)
        .bind(job.submitted_at)
        .bind(job.last_processed_at)
        .bind(job.lock_token)
        .bind(job.lock_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "job", job.id))?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, CoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn claim_job(
        &self,
        statuses: &[JobStatus],
        claim: &Claim<'_>,
    ) -> Result<Option<Job>, CoreError> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let sql = format!(
            r#"
            WITH candidate AS (
                SELECT id FROM jobs
                WHERE {CLAIMABLE}
                  AND status = ANY($3)
                  AND id <> ALL($4)
                  AND last_processed_at <= $5
                ORDER BY last_processed_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs j
            SET lock_token = $1, lock_expires_at = $2
            FROM candidate c
            WHERE j.id = c.id
            RETURNING j.*
            "#
        );

        let row = sqlx::query(&sql)
            .bind(claim.lock_token)
            .bind(claim.lock_expires_at)
            .bind(statuses)
            .bind(claim.exclude)
            .bind(claim.processed_before)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn release_job(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        update: &JobUpdate,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;

        let owned: Option<(Option<Uuid>,)> = sqlx::query_as(
            "SELECT instance_id FROM jobs WHERE id = $1 AND lock_token = $2 FOR UPDATE",
        )
        .bind(job_id)
        .bind(lock_token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((instance_id,)) = owned else {
            tx.rollback().await?;
            return Ok(false);
        };

        if let (Some(status), Some(instance_id)) = (update.instance_status, instance_id) {
            sqlx::query("UPDATE instances SET status = $2 WHERE id = $1")
                .bind(instance_id)
                .bind(status.as_str())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = COALESCE($2, status),
                termination_reason = COALESCE($3, termination_reason),
                termination_message = COALESCE($4, termination_message),
                job_provisioning_data = CASE WHEN $5 THEN NULL ELSE job_provisioning_data END,
                instance_id = CASE WHEN $5 THEN NULL ELSE instance_id END,
                lock_token = NULL,
                lock_expires_at = NULL,
                last_processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.termination_reason.map(|r| r.as_str()))
        .bind(&update.termination_message)
        .bind(update.clear_provisioning)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn extend_job_lease(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        lock_expires_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result =
            sqlx::query("UPDATE jobs SET lock_expires_at = $3 WHERE id = $1 AND lock_token = $2")
                .bind(job_id)
                .bind(lock_token)
                .bind(lock_expires_at)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_job_provisioned(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        provisioned: &JobProvisioned,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;

        let owned: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM jobs WHERE id = $1 AND lock_token = $2 FOR UPDATE")
                .bind(job_id)
                .bind(lock_token)
                .fetch_optional(&mut *tx)
                .await?;
        if owned.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(fleet) = &provisioned.new_fleet {
            insert_fleet(&mut *tx, fleet).await?;
        }
        insert_instance(&mut *tx, &provisioned.instance).await?;

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = $2,
                job_provisioning_data = $3,
                instance_id = $4,
                fleet_id = $5,
                lock_token = NULL,
                lock_expires_at = NULL,
                last_processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Provisioning.as_str())
        .bind(Json(&provisioned.provisioning_data))
        .bind(provisioned.instance.id)
        .bind(provisioned.instance.fleet_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn request_job_termination(
        &self,
        job_id: Uuid,
        reason: JobTerminationReason,
        message: Option<&str>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = CASE WHEN status IN ('submitted', 'pending') THEN $2 ELSE 'terminating' END,
                termination_reason = $3,
                termination_message = $4
            WHERE id = $1
              AND status NOT IN ('terminated', 'done', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(reason.to_status().as_str())
        .bind(reason.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get_job(job_id).await?.is_none() {
            return Err(CoreError::not_found("job", job_id));
        }
        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_jobs(&self) -> Result<Vec<Job>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status = 'pending' AND deleted = FALSE
            ORDER BY last_processed_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn resubmit_job(&self, job_id: Uuid) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'submitted',
                submission_num = submission_num + 1,
                submitted_at = NOW(),
                last_processed_at = NOW(),
                termination_reason = NULL,
                termination_message = NULL
            WHERE id = $1 AND status = 'pending' AND deleted = FALSE
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Instances
    // ========================================================================

    async fn create_instance(&self, instance: &Instance) -> Result<(), CoreError> {
        insert_instance(&self.pool, instance)
            .await
            .map_err(|e| map_unique(e, "instance", instance.id))
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<Instance>, CoreError> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(instance_from_row).transpose()
    }

    async fn list_fleet_instances(&self, fleet_id: Uuid) -> Result<Vec<Instance>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM instances
            WHERE fleet_id = $1 AND deleted = FALSE
            ORDER BY created_at ASC
            "#,
        )
        .bind(fleet_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(instance_from_row).collect()
    }

    async fn set_instance_status(
        &self,
        id: Uuid,
        status: InstanceStatus,
    ) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE instances SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("instance", id));
        }
        Ok(())
    }

    // ========================================================================
    // Managed resources
    // ========================================================================

    async fn create_fleet(&self, fleet: &Fleet) -> Result<(), CoreError> {
        insert_fleet(&self.pool, fleet)
            .await
            .map_err(|e| map_unique(e, "fleet", fleet.id))
    }

    async fn get_fleet(&self, id: Uuid) -> Result<Option<Fleet>, CoreError> {
        let row = sqlx::query("SELECT * FROM fleets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(fleet_from_row).transpose()
    }

    async fn create_gateway(&self, gateway: &Gateway) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO gateways (id, project_name, name, backend, region, status, status_message,
                                  provisioning_data, to_be_deleted, created_at, deleted,
                                  last_processed_at, lock_token, lock_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(gateway.id)
        .bind(&gateway.project_name)
        .bind(&gateway.name)
        .bind(gateway.backend.as_str())
        .bind(&gateway.region)
        .bind(gateway.status.as_str())
        .bind(&gateway.status_message)
        .bind(gateway.provisioning_data.as_ref().map(Json))
        .bind(gateway.to_be_deleted)
        .bind(gateway.created_at)
        .bind(gateway.lease.deleted)
        .bind(gateway.lease.last_processed_at)
        .bind(gateway.lease.lock_token)
        .bind(gateway.lease.lock_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "gateway", gateway.id))?;
        Ok(())
    }

    async fn get_gateway(&self, id: Uuid) -> Result<Option<Gateway>, CoreError> {
        let row = sqlx::query("SELECT * FROM gateways WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(gateway_from_row).transpose()
    }

    async fn create_placement_group(&self, group: &PlacementGroup) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO placement_groups (id, project_name, name, fleet_id, backend, region,
                                          backend_data, to_be_deleted, created_at, deleted,
                                          last_processed_at, lock_token, lock_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(group.id)
        .bind(&group.project_name)
        .bind(&group.name)
        .bind(group.fleet_id)
        .bind(group.backend.as_str())
        .bind(&group.region)
        .bind(&group.backend_data)
        .bind(group.to_be_deleted)
        .bind(group.created_at)
        .bind(group.lease.deleted)
        .bind(group.lease.last_processed_at)
        .bind(group.lease.lock_token)
        .bind(group.lease.lock_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "placement group", group.id))?;
        Ok(())
    }

    async fn get_placement_group(&self, id: Uuid) -> Result<Option<PlacementGroup>, CoreError> {
        let row = sqlx::query("SELECT * FROM placement_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(placement_group_from_row).transpose()
    }

    async fn create_volume(&self, volume: &Volume) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO volumes (id, project_name, name, backend, region, size_gb,
                                 external_volume_id, status, status_message, provisioning_data,
                                 to_be_deleted, created_at, deleted, last_processed_at,
                                 lock_token, lock_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(volume.id)
        .bind(&volume.project_name)
        .bind(&volume.name)
        .bind(volume.backend.as_str())
        .bind(&volume.region)
        .bind(volume.size_gb.and_then(|s| i32::try_from(s).ok()))
        .bind(&volume.external_volume_id)
        .bind(volume.status.as_str())
        .bind(&volume.status_message)
        .bind(volume.provisioning_data.as_ref().map(Json))
        .bind(volume.to_be_deleted)
        .bind(volume.created_at)
        .bind(volume.lease.deleted)
        .bind(volume.lease.last_processed_at)
        .bind(volume.lease.lock_token)
        .bind(volume.lease.lock_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "volume", volume.id))?;
        Ok(())
    }

    async fn get_volume(&self, id: Uuid) -> Result<Option<Volume>, CoreError> {
        let row = sqlx::query("SELECT * FROM volumes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(volume_from_row).transpose()
    }

    async fn claim_items(
        &self,
        kind: ResourceKind,
        claim: &Claim<'_>,
        limit: usize,
    ) -> Result<Vec<PipelineItem>, CoreError> {
        let table = kind.table_name();
        let sql = format!(
            r#"
            WITH candidate AS (
                SELECT id, lock_token IS NOT NULL AS prev_lock_expired FROM {table}
                WHERE {CLAIMABLE}
                  AND id <> ALL($3)
                  AND last_processed_at <= $4
                ORDER BY last_processed_at ASC
                LIMIT $5
                FOR UPDATE SKIP LOCKED
            )
            UPDATE {table} t
            SET lock_token = $1, lock_expires_at = $2
            FROM candidate c
            WHERE t.id = c.id
            RETURNING t.id, t.last_processed_at, c.prev_lock_expired
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(claim.lock_token)
            .bind(claim.lock_expires_at)
            .bind(claim.exclude)
            .bind(claim.processed_before)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let mut claimed = rows
            .iter()
            .map(|row| {
                let last: DateTime<Utc> = row.try_get("last_processed_at")?;
                let item = PipelineItem {
                    kind,
                    id: row.try_get("id")?,
                    lock_token: claim.lock_token,
                    lock_expires_at: claim.lock_expires_at,
                    prev_lock_expired: row.try_get("prev_lock_expired")?,
                };
                Ok((last, item))
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        claimed.sort_by_key(|(last, _)| *last);
        Ok(claimed.into_iter().map(|(_, item)| item).collect())
    }

    async fn extend_leases(
        &self,
        items: &[PipelineItem],
        lock_expires_at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, CoreError> {
        let mut extended = Vec::with_capacity(items.len());
        for item in items {
            let sql = format!(
                "UPDATE {} SET lock_expires_at = $3 WHERE id = $1 AND lock_token = $2",
                item.table_name()
            );
            let result = sqlx::query(&sql)
                .bind(item.id)
                .bind(item.lock_token)
                .bind(lock_expires_at)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() > 0 {
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
        const RELEASE: &str =
            "lock_token = NULL, lock_expires_at = NULL, last_processed_at = NOW()";
        const OWNED: &str = "WHERE id = $1 AND lock_token = $2";

        let result = match update {
            None => {
                let sql = format!("UPDATE {} SET {RELEASE} {OWNED}", item.table_name());
                sqlx::query(&sql)
                    .bind(item.id)
                    .bind(item.lock_token)
                    .execute(&self.pool)
                    .await?
            }
            Some(update) => {
                update.check_kind(item)?;
                match update {
                    ResourceUpdate::Fleet(u) => {
                        let sql = format!(
                            "UPDATE fleets SET status = COALESCE($3, status), \
                             deleted = deleted OR $4, {RELEASE} {OWNED}"
                        );
                        sqlx::query(&sql)
                            .bind(item.id)
                            .bind(item.lock_token)
                            .bind(u.status.map(|s| s.as_str()))
                            .bind(u.deleted)
                            .execute(&self.pool)
                            .await?
                    }
                    ResourceUpdate::Gateway(u) => {
                        let sql = format!(
                            "UPDATE gateways SET status = COALESCE($3, status), \
                             status_message = COALESCE($4, status_message), \
                             provisioning_data = COALESCE($5, provisioning_data), \
                             deleted = deleted OR $6, {RELEASE} {OWNED}"
                        );
                        sqlx::query(&sql)
                            .bind(item.id)
                            .bind(item.lock_token)
                            .bind(u.status.map(|s| s.as_str()))
                            .bind(&u.status_message)
                            .bind(u.provisioning_data.as_ref().map(Json))
                            .bind(u.deleted)
                            .execute(&self.pool)
                            .await?
                    }
                    ResourceUpdate::PlacementGroup(u) => {
                        let sql = format!(
                            "UPDATE placement_groups SET deleted = deleted OR $3, {RELEASE} {OWNED}"
                        );
                        sqlx::query(&sql)
                            .bind(item.id)
                            .bind(item.lock_token)
                            .bind(u.deleted)
                            .execute(&self.pool)
                            .await?
                    }
                    ResourceUpdate::Volume(u) => {
                        let sql = format!(
                            "UPDATE volumes SET status = COALESCE($3, status), \
                             status_message = COALESCE($4, status_message), \
                             provisioning_data = COALESCE($5, provisioning_data), \
                             deleted = deleted OR $6, {RELEASE} {OWNED}"
                        );
                        sqlx::query(&sql)
                            .bind(item.id)
                            .bind(item.lock_token)
                            .bind(u.status.map(|s| s.as_str()))
                            .bind(&u.status_message)
                            .bind(u.provisioning_data.as_ref().map(Json))
                            .bind(u.deleted)
                            .execute(&self.pool)
                            .await?
                    }
                }
            }
        };

        Ok(result.rows_affected() > 0)
    }
}
