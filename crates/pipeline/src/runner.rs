//! Drives one job through its pipeline.
//!
//! The runner owns a job from `pending` until it reaches a terminal status.
//! Every transition is persisted before the matching event is published, so
//! a client polling the store never lags behind the live channel.

use std::sync::Arc;
use std::time::Duration;

use journal_core::error::CoreError;
use journal_core::job_events::JobEvent;
use journal_core::job_type::JobType;
use journal_core::params::{parse_params, ExportParams};
use journal_core::types::JobId;
use journal_db::error::DbError;
use journal_db::models::artifact::Project;
use journal_db::models::job::{Job, JobPatch};
use journal_db::models::status::JobStatus;
use journal_db::repositories::{ArtifactStore, CreditStore, JobStore};
use serde_json::Value;

use crate::executor::{StageContext, StageError, StageExecutor};
use crate::finalizer::{FinalizeError, Finalizers};
use crate::stage::Pipeline;
use crate::subscribers::SubscriberRegistry;

/// Default per-stage deadline.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default credits debited per completed job.
pub const DEFAULT_CREDIT_COST: i64 = 1;

/// Charge attempts made before a completed job is left for reconciliation.
pub const CHARGE_ATTEMPTS: u32 = 3;

/// Delay before the first charge retry; doubles on each further attempt.
pub const DEFAULT_CHARGE_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub stage_timeout: Duration,
    pub credit_cost: i64,
    pub charge_retry_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            credit_cost: DEFAULT_CREDIT_COST,
            charge_retry_delay: DEFAULT_CHARGE_RETRY_DELAY,
        }
    }
}

/// Why a run stopped short of completion.
#[derive(Debug, thiserror::Error)]
enum RunError {
    /// Cancellation was requested and observed at a stage boundary.
    #[error("cancelled")]
    Cancelled,

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        source: StageError,
    },

    #[error("Finalization failed: {0}")]
    Finalize(#[from] FinalizeError),

    #[error("Job store error: {0}")]
    Store(#[from] DbError),
}

/// Executes the stages of a job and records every step.
pub struct PipelineRunner {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    credits: Arc<dyn CreditStore>,
    executor: Arc<dyn StageExecutor>,
    finalizers: Finalizers,
    subscribers: Arc<SubscriberRegistry>,
    config: RunnerConfig,
}

impl PipelineRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        credits: Arc<dyn CreditStore>,
        executor: Arc<dyn StageExecutor>,
        finalizers: Finalizers,
        subscribers: Arc<SubscriberRegistry>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            credits,
            executor,
            finalizers,
            subscribers,
            config,
        }
    }

    /// Run a pending job to a terminal status and return that status.
    ///
    /// Fails only when the job cannot be claimed: it is unknown or no
    /// longer pending. Every failure after the claim is recorded on the job
    /// instead.
    pub async fn run(&self, job_id: JobId) -> Result<JobStatus, CoreError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Job", job_id))?;
        if job.status != JobStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} is {} and cannot be run",
                job.status
            )));
        }

        let job = self
            .jobs
            .update(job_id, JobPatch::status(JobStatus::Running))
            .await?;
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            executor = self.executor.name(),
            "Job started",
        );
        self.subscribers
            .publish(job_id, JobEvent::started(job_id))
            .await;

        let status = match self.execute_stages(&job).await {
            Ok(result) => self.complete(&job, result).await,
            Err(RunError::Cancelled) => self.cancel(job_id).await,
            Err(e) => self.fail(job_id, e.to_string()).await,
        };

        self.subscribers.close_job(job_id).await;
        Ok(status)
    }

    async fn execute_stages(&self, job: &Job) -> Result<Value, RunError> {
        let pipeline = Pipeline::for_job_type(job.job_type);
        let mut ctx = StageContext::for_job(job);
        ctx.source_project = self.load_source_project(job).await?;

        for (index, stage) in pipeline.stages().iter().enumerate() {
            self.check_cancelled(job.id).await?;

            let output = match tokio::time::timeout(
                self.config.stage_timeout,
                self.executor.execute(stage, &ctx),
            )
            .await
            {
                Ok(Ok(output)) => output,
                Ok(Err(source)) => {
                    return Err(RunError::Stage {
                        stage: stage.name,
                        source,
                    })
                }
                Err(_) => {
                    return Err(RunError::Stage {
                        stage: stage.name,
                        source: StageError::TimedOut(self.config.stage_timeout),
                    })
                }
            };
            ctx.record(stage.name, output);

            let progress = pipeline.progress_after(index);
            let updated = self
                .jobs
                .update(
                    job.id,
                    JobPatch::stage_completed(progress, stage.name, (index + 1) as i16),
                )
                .await?;

            tracing::debug!(
                job_id = %job.id,
                stage = stage.name,
                progress = updated.progress_percent,
                "Stage completed",
            );
            self.subscribers
                .publish(
                    job.id,
                    JobEvent::progress(job.id, updated.progress_percent, stage.name, stage.message),
                )
                .await;
        }

        self.check_cancelled(job.id).await?;
        let result = self
            .finalizers
            .for_job_type(job.job_type)
            .finalize(&ctx)
            .await?;
        Ok(result)
    }

    /// The project an export job renders, loaded once before the first stage.
    async fn load_source_project(&self, job: &Job) -> Result<Option<Project>, RunError> {
        if job.job_type != JobType::Export {
            return Ok(None);
        }
        let Ok(params) = parse_params::<ExportParams>(&job.parameters) else {
            return Ok(None);
        };
        Ok(self.artifacts.find_project(params.project_id).await?)
    }

    async fn check_cancelled(&self, job_id: JobId) -> Result<(), RunError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| DbError::not_found("Job", job_id))?;
        if job.cancellation_requested {
            return Err(RunError::Cancelled);
        }
        Ok(())
    }

    // ---- terminal transitions ----

    async fn complete(&self, job: &Job, result: Value) -> JobStatus {
        let completed = match self
            .jobs
            .update(job.id, JobPatch::completed(result.clone()))
            .await
        {
            Ok(completed) => completed,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                return self
                    .fail(job.id, format!("Failed to record completion: {e}"))
                    .await;
            }
        };

        self.settle_charge(&completed).await;

        tracing::info!(job_id = %job.id, "Job completed");
        self.subscribers
            .publish(
                job.id,
                JobEvent::completed(job.id, result).with_stage(completed.current_stage),
            )
            .await;
        JobStatus::Completed
    }

    /// Debit the owner of a completed job and clear its pending-charge flag.
    ///
    /// The charge is idempotent per job, so it is retried with backoff up to
    /// [`CHARGE_ATTEMPTS`] times. Returns `false` when the flag is still set,
    /// leaving the job for [`JobEngine::recover_interrupted`] to settle.
    ///
    /// [`JobEngine::recover_interrupted`]: crate::engine::JobEngine::recover_interrupted
    pub async fn settle_charge(&self, job: &Job) -> bool {
        let mut delay = self.config.charge_retry_delay;
        let mut attempt = 1;
        let charged = loop {
            match self
                .credits
                .charge(job.owner_id, job.id, self.config.credit_cost)
                .await
            {
                Ok(charged) => break charged,
                Err(e) if attempt < CHARGE_ATTEMPTS => {
                    tracing::warn!(
                        job_id = %job.id,
                        attempt,
                        error = %e,
                        "Credit charge failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %job.id,
                        attempts = attempt,
                        error = %e,
                        "Credit charge failed, left pending for reconciliation",
                    );
                    return false;
                }
            }
        };

        if charged {
            tracing::info!(
                job_id = %job.id,
                owner_id = job.owner_id,
                amount = self.config.credit_cost,
                "Credits charged",
            );
        } else {
            tracing::warn!(job_id = %job.id, "Job was already charged");
        }

        match self.jobs.settle_charge(job.id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to clear pending charge");
                false
            }
        }
    }

    async fn cancel(&self, job_id: JobId) -> JobStatus {
        match self
            .jobs
            .update(job_id, JobPatch::status(JobStatus::Cancelled))
            .await
        {
            Ok(job) => {
                tracing::info!(
                    job_id = %job_id,
                    progress = job.progress_percent,
                    "Job cancelled",
                );
                self.subscribers
                    .publish(
                        job_id,
                        JobEvent::cancelled(job_id, job.progress_percent)
                            .with_stage(job.current_stage),
                    )
                    .await;
                JobStatus::Cancelled
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job cancelled");
                self.current_status(job_id).await
            }
        }
    }

    /// Best effort: a store failure here is logged and the job is left as
    /// it was.
    async fn fail(&self, job_id: JobId, message: String) -> JobStatus {
        tracing::warn!(job_id = %job_id, error = %message, "Job failed");
        match self.jobs.update(job_id, JobPatch::failed(message.clone())).await {
            Ok(job) => {
                self.subscribers
                    .publish(
                        job_id,
                        JobEvent::failed(job_id, job.progress_percent, message)
                            .with_stage(job.current_stage),
                    )
                    .await;
                JobStatus::Failed
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job failed");
                self.current_status(job_id).await
            }
        }
    }

    async fn current_status(&self, job_id: JobId) -> JobStatus {
        match self.jobs.get(job_id).await {
            Ok(Some(job)) => job.status,
            _ => JobStatus::Failed,
        }
    }
}
