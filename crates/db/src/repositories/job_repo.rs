//! Store for the `jobs` table.
//!
//! All writes go through [`Job::apply_patch`] so the Postgres and in-memory
//! stores enforce the same lifecycle rules.

use async_trait::async_trait;
use journal_core::types::{DbId, JobId};
use sqlx::PgPool;

use crate::error::DbError;
use crate::models::job::{Job, JobListQuery, JobPatch, NewJob};
use crate::models::status::{JobStatus, StatusId};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, job_type, status_id, owner_id, parameters, \
    progress_percent, current_stage, stage_index, total_stages, \
    result, error_message, cancellation_requested, charge_pending, \
    estimated_duration_secs, retry_of_job_id, \
    created_at, updated_at, started_at, completed_at";

/// Non-terminal statuses: pending, running.
const UNFINISHED_STATUSES: [StatusId; 2] = [
    JobStatus::Pending as StatusId,
    JobStatus::Running as StatusId,
];

/// Durable keyed store of job records.
///
/// `update` must be atomic and serialized per job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job.
    async fn create(&self, input: NewJob) -> Result<Job, DbError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, DbError>;

    /// Apply a patch atomically and return the updated record.
    ///
    /// Fails with [`DbError::NotFound`] for unknown ids and
    /// [`DbError::Conflict`] when the patch breaks the lifecycle.
    async fn update(&self, id: JobId, patch: JobPatch) -> Result<Job, DbError>;

    /// An owner's jobs, newest first.
    async fn list(&self, owner_id: DbId, query: &JobListQuery) -> Result<Vec<Job>, DbError>;

    /// Every pending or running job, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<Job>, DbError>;

    /// Clear the pending-charge flag of a completed job.
    async fn settle_charge(&self, id: JobId) -> Result<Job, DbError>;

    /// Completed jobs whose charge is still outstanding, oldest first.
    async fn list_pending_charges(&self) -> Result<Vec<Job>, DbError>;
}

/// Postgres-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: NewJob) -> Result<Job, DbError> {
        let job = Job::new(input, chrono::Utc::now());
        let query = format!(
            "INSERT INTO jobs \
                 (id, job_type, status_id, owner_id, parameters, total_stages, \
                  estimated_duration_secs, retry_of_job_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(job.id)
            .bind(job.job_type.as_str())
            .bind(job.status.id())
            .bind(job.owner_id)
            .bind(&job.parameters)
            .bind(job.total_stages)
            .bind(job.estimated_duration_secs)
            .bind(job.retry_of_job_id)
            .bind(job.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Row-locks the job with `SELECT ... FOR UPDATE`, applies the patch in
    /// memory and writes the full mutable column set back in the same
    /// transaction.
    async fn update(&self, id: JobId, patch: JobPatch) -> Result<Job, DbError> {
        let mut tx = self.pool.begin().await?;

        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        let mut job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Job", id))?;

        job.apply_patch(patch, chrono::Utc::now())?;

        sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, progress_percent = $3, current_stage = $4, \
                 stage_index = $5, result = $6, error_message = $7, \
                 cancellation_requested = $8, charge_pending = $9, \
                 updated_at = $10, started_at = $11, completed_at = $12 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.id())
        .bind(job.progress_percent)
        .bind(&job.current_stage)
        .bind(job.stage_index)
        .bind(&job.result)
        .bind(&job.error_message)
        .bind(job.cancellation_requested)
        .bind(job.charge_pending)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn list(&self, owner_id: DbId, params: &JobListQuery) -> Result<Vec<Job>, DbError> {
        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = vec!["owner_id = $1".to_string()];
        let mut bind_idx: u32 = 2;

        if params.status.is_some() {
            conditions.push(format!("status_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.job_type.is_some() {
            conditions.push(format!("job_type = ${bind_idx}"));
            bind_idx += 1;
        }

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE {} \
             ORDER BY created_at DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            conditions.join(" AND "),
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Job>(&query).bind(owner_id);
        if let Some(status) = params.status {
            q = q.bind(status.id());
        }
        if let Some(job_type) = params.job_type {
            q = q.bind(job_type.as_str());
        }
        q = q
            .bind(params.effective_limit())
            .bind(params.effective_offset());

        Ok(q.fetch_all(&self.pool).await?)
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id IN ($1, $2) \
             ORDER BY created_at ASC"
        );
        let jobs = sqlx::query_as::<_, Job>(&query)
            .bind(UNFINISHED_STATUSES[0])
            .bind(UNFINISHED_STATUSES[1])
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn settle_charge(&self, id: JobId) -> Result<Job, DbError> {
        let mut tx = self.pool.begin().await?;

        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        let mut job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Job", id))?;

        job.settle_charge(chrono::Utc::now())?;

        sqlx::query("UPDATE jobs SET charge_pending = $2, updated_at = $3 WHERE id = $1")
            .bind(job.id)
            .bind(job.charge_pending)
            .bind(job.updated_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn list_pending_charges(&self) -> Result<Vec<Job>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE charge_pending AND status_id = $1 \
             ORDER BY completed_at ASC"
        );
        let jobs = sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Completed.id())
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }
}
