//! Job entity models and DTOs for the asynchronous job engine.

use journal_core::job_type::JobType;
use journal_core::types::{DbId, JobId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::JobStatus;
use crate::error::DbError;

/// Progress ceiling; stage weights of a pipeline sum to this.
pub const MAX_PROGRESS: i16 = 100;

/// Maximum page size for job listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: i64 = 50;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    #[sqlx(try_from = "String")]
    pub job_type: JobType,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: JobStatus,
    pub owner_id: DbId,
    pub parameters: serde_json::Value,
    pub progress_percent: i16,
    pub current_stage: Option<String>,
    pub stage_index: i16,
    pub total_stages: i16,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub cancellation_requested: bool,
    /// Set on completion until the owner has been debited for this job.
    pub charge_pending: bool,
    pub estimated_duration_secs: Option<i32>,
    pub retry_of_job_id: Option<JobId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Input for creating a new pending job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub owner_id: DbId,
    pub parameters: serde_json::Value,
    pub total_stages: i16,
    pub estimated_duration_secs: Option<i32>,
    pub retry_of_job_id: Option<JobId>,
}

/// A partial update applied atomically to one job.
///
/// `None` fields are left untouched. Apply with [`Job::apply_patch`], which
/// enforces the lifecycle rules every store must honour.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress_percent: Option<i16>,
    pub current_stage: Option<String>,
    pub stage_index: Option<i16>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub cancellation_requested: Option<bool>,
    pub charge_pending: Option<bool>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Record a completed stage.
    pub fn stage_completed(progress_percent: i16, stage: &str, stage_index: i16) -> Self {
        Self {
            progress_percent: Some(progress_percent),
            current_stage: Some(stage.to_string()),
            stage_index: Some(stage_index),
            ..Default::default()
        }
    }

    /// Complete the job and flag its charge as outstanding in the same
    /// write.
    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(result),
            charge_pending: Some(true),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn cancellation_requested() -> Self {
        Self {
            cancellation_requested: Some(true),
            ..Default::default()
        }
    }
}

impl Job {
    /// Build a fresh pending job record.
    pub fn new(input: NewJob, now: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            job_type: input.job_type,
            status: JobStatus::Pending,
            owner_id: input.owner_id,
            parameters: input.parameters,
            progress_percent: 0,
            current_stage: None,
            stage_index: 0,
            total_stages: input.total_stages,
            result: None,
            error_message: None,
            cancellation_requested: false,
            charge_pending: false,
            estimated_duration_secs: input.estimated_duration_secs,
            retry_of_job_id: input.retry_of_job_id,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a patch in place, enforcing the lifecycle invariants:
    ///
    /// - terminal jobs are immutable;
    /// - status moves only along legal transitions, so a second claim of a
    ///   running job fails;
    /// - progress never decreases and never exceeds [`MAX_PROGRESS`];
    /// - `result` and `charge_pending` are only written together with
    ///   `Completed`, and `error_message` only together with `Failed`.
    pub fn apply_patch(&mut self, patch: JobPatch, now: Timestamp) -> Result<(), DbError> {
        if self.is_terminal() {
            return Err(DbError::Conflict(format!(
                "Job {} is already {} and cannot be modified",
                self.id, self.status
            )));
        }

        let next = match patch.status {
            Some(next) if !self.status.can_transition_to(next) => {
                return Err(DbError::Conflict(format!(
                    "Job {} cannot move from {} to {}",
                    self.id, self.status, next
                )));
            }
            Some(next) => next,
            None => self.status,
        };
        if patch.result.is_some() && next != JobStatus::Completed {
            return Err(DbError::Conflict(
                "A result may only be recorded on completion".into(),
            ));
        }
        if patch.charge_pending.is_some() && next != JobStatus::Completed {
            return Err(DbError::Conflict(
                "A pending charge may only be recorded on completion".into(),
            ));
        }
        if patch.error_message.is_some() && next != JobStatus::Failed {
            return Err(DbError::Conflict(
                "An error message may only be recorded on failure".into(),
            ));
        }

        if patch.status.is_some() {
            if next == JobStatus::Running {
                self.started_at = Some(now);
            }
            if next.is_terminal() {
                self.completed_at = Some(now);
            }
            self.status = next;
        }

        if let Some(progress) = patch.progress_percent {
            self.progress_percent = self.progress_percent.max(progress.clamp(0, MAX_PROGRESS));
        }
        if let Some(stage) = patch.current_stage {
            self.current_stage = Some(stage);
        }
        if let Some(index) = patch.stage_index {
            self.stage_index = self.stage_index.max(index);
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(message) = patch.error_message {
            self.error_message = Some(message);
        }
        if let Some(requested) = patch.cancellation_requested {
            self.cancellation_requested = requested;
        }
        if let Some(pending) = patch.charge_pending {
            self.charge_pending = pending;
        }

        self.updated_at = now;
        Ok(())
    }

    /// Clear the pending-charge flag once the owner has been debited.
    ///
    /// The only change allowed on a terminal job. Settling twice is a no-op.
    pub fn settle_charge(&mut self, now: Timestamp) -> Result<(), DbError> {
        if self.status != JobStatus::Completed {
            return Err(DbError::Conflict(format!(
                "Job {} is {} and has no charge to settle",
                self.id, self.status
            )));
        }
        if self.charge_pending {
            self.charge_pending = false;
            self.updated_at = now;
        }
        Ok(())
    }
}

/// Query parameters for listing an owner's jobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

impl JobListQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Whether a job passes the status and type filters.
    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.job_type.map_or(true, |t| job.job_type == t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn pending_job() -> Job {
        Job::new(
            NewJob {
                job_type: JobType::ContentGeneration,
                owner_id: 7,
                parameters: serde_json::json!({"theme": "mindfulness"}),
                total_stages: 6,
                estimated_duration_secs: Some(180),
                retry_of_job_id: None,
            },
            chrono::Utc::now(),
        )
    }

    #[test]
    fn new_job_starts_pending_at_zero() {
        let job = pending_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress_percent, 0);
        assert!(!job.cancellation_requested);
        assert!(job.result.is_none());
    }

    #[test]
    fn running_sets_started_at() {
        let mut job = pending_job();
        job.apply_patch(JobPatch::status(JobStatus::Running), chrono::Utc::now())
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let mut job = pending_job();
        let now = chrono::Utc::now();
        job.apply_patch(JobPatch::status(JobStatus::Running), now).unwrap();

        job.apply_patch(JobPatch::stage_completed(40, "content_writing", 4), now)
            .unwrap();
        job.apply_patch(JobPatch::stage_completed(10, "theme_analysis", 1), now)
            .unwrap();
        assert_eq!(job.progress_percent, 40);
        assert_eq!(job.stage_index, 4);

        job.apply_patch(JobPatch::stage_completed(130, "media_prompts", 6), now)
            .unwrap();
        assert_eq!(job.progress_percent, MAX_PROGRESS);
    }

    #[test]
    fn terminal_job_rejects_further_patches() {
        let mut job = pending_job();
        let now = chrono::Utc::now();
        job.apply_patch(JobPatch::status(JobStatus::Running), now).unwrap();
        job.apply_patch(JobPatch::completed(serde_json::json!({"project_id": "x"})), now)
            .unwrap();
        assert!(job.completed_at.is_some());

        assert_matches!(
            job.apply_patch(JobPatch::cancellation_requested(), now),
            Err(DbError::Conflict(_))
        );
        assert!(!job.cancellation_requested);
    }

    #[test]
    fn pending_cannot_jump_to_completed() {
        let mut job = pending_job();
        let result = job.apply_patch(
            JobPatch::completed(serde_json::json!({})),
            chrono::Utc::now(),
        );
        assert_matches!(result, Err(DbError::Conflict(_)));
    }

    #[test]
    fn running_job_cannot_be_claimed_twice() {
        let mut job = pending_job();
        let now = chrono::Utc::now();
        job.apply_patch(JobPatch::status(JobStatus::Running), now).unwrap();
        assert_matches!(
            job.apply_patch(JobPatch::status(JobStatus::Running), now),
            Err(DbError::Conflict(_))
        );
    }

    #[test]
    fn result_requires_completed_status() {
        let mut job = pending_job();
        let now = chrono::Utc::now();
        job.apply_patch(JobPatch::status(JobStatus::Running), now).unwrap();
        let patch = JobPatch {
            result: Some(serde_json::json!({})),
            ..Default::default()
        };
        assert_matches!(job.apply_patch(patch, now), Err(DbError::Conflict(_)));
    }

    #[test]
    fn completion_leaves_charge_pending_until_settled() {
        let mut job = pending_job();
        let now = chrono::Utc::now();
        assert_matches!(job.settle_charge(now), Err(DbError::Conflict(_)));

        job.apply_patch(JobPatch::status(JobStatus::Running), now).unwrap();
        job.apply_patch(JobPatch::completed(serde_json::json!({})), now)
            .unwrap();
        assert!(job.charge_pending);

        job.settle_charge(now).unwrap();
        assert!(!job.charge_pending);
        job.settle_charge(now).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn failed_job_has_no_charge_to_settle() {
        let mut job = pending_job();
        let now = chrono::Utc::now();
        job.apply_patch(JobPatch::status(JobStatus::Running), now).unwrap();
        job.apply_patch(JobPatch::failed("boom"), now).unwrap();

        assert!(!job.charge_pending);
        assert_matches!(job.settle_charge(now), Err(DbError::Conflict(_)));
    }

    #[test]
    fn list_query_clamps_pagination() {
        let query = JobListQuery {
            limit: Some(5_000),
            offset: Some(-3),
            ..Default::default()
        };
        assert_eq!(query.effective_limit(), MAX_LIMIT);
        assert_eq!(query.effective_offset(), 0);
        assert_eq!(JobListQuery::default().effective_limit(), DEFAULT_LIMIT);
    }
}
