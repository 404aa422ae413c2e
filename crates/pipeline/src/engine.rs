//! The job engine: creation-time checks, runner dispatch, status queries,
//! cooperative cancellation, retries and restart recovery.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use journal_core::error::CoreError;
use journal_core::estimation::{estimate_duration_secs, estimate_remaining_secs};
use journal_core::job_events::JobEvent;
use journal_core::job_type::JobType;
use journal_core::params::{parse_params, validate_for, ExportParams};
use journal_core::types::{DbId, JobId, Timestamp};
use journal_db::error::DbError;
use journal_db::models::job::{Job, JobListQuery, JobPatch, NewJob};
use journal_db::models::status::JobStatus;
use journal_db::repositories::{ArtifactStore, CreditStore, JobStore};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use crate::executor::StageExecutor;
use crate::finalizer::Finalizers;
use crate::runner::{PipelineRunner, RunnerConfig};
use crate::stage::Pipeline;
use crate::subscribers::{SubscriberMessage, SubscriberRegistry, Subscription};

/// Error recorded on jobs found unfinished at startup.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by server restart";

// ---------------------------------------------------------------------------
// Configuration and DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub runner: RunnerConfig,
    /// Directory export files are written to.
    pub export_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            export_dir: PathBuf::from("./exports"),
        }
    }
}

/// Identity of the caller of an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub owner_id: DbId,
    /// Admins may view and cancel any job.
    pub is_admin: bool,
}

impl Requester {
    pub fn owner(owner_id: DbId) -> Self {
        Self {
            owner_id,
            is_admin: false,
        }
    }
}

/// Response of a successful job creation.
#[derive(Debug, Clone, Serialize)]
pub struct JobCreated {
    pub job_id: JobId,
    /// Estimated total run time in seconds.
    pub estimated_duration: i32,
}

/// Pollable view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress_percentage: i16,
    pub current_stage: Option<String>,
    pub stage_index: i16,
    pub total_stages: i16,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub cancellation_requested: bool,
    pub retry_of_job_id: Option<JobId>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Seconds left, extrapolated from progress so far.
    pub estimated_time_remaining: Option<i64>,
}

impl JobStatusView {
    pub fn from_job(job: &Job, now: Timestamp) -> Self {
        let since = job.started_at.unwrap_or(job.created_at);
        let elapsed = (now - since).num_seconds();
        Self {
            job_id: job.id,
            job_type: job.job_type,
            status: job.status,
            progress_percentage: job.progress_percent,
            current_stage: job.current_stage.clone(),
            stage_index: job.stage_index,
            total_stages: job.total_stages,
            result: job.result.clone(),
            error_message: job.error_message.clone(),
            cancellation_requested: job.cancellation_requested,
            retry_of_job_id: job.retry_of_job_id,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            estimated_time_remaining: estimate_remaining_secs(
                job.estimated_duration_secs,
                elapsed,
                job.progress_percent,
                job.is_terminal(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Active-runner bookkeeping
// ---------------------------------------------------------------------------

type ActiveSet = Arc<Mutex<HashSet<JobId>>>;

/// Membership of one job in the active-runner set, released on drop.
struct ActiveRun {
    active: ActiveSet,
    job_id: JobId,
}

impl ActiveRun {
    /// `None` when the job already has a runner.
    fn claim(active: &ActiveSet, job_id: JobId) -> Option<Self> {
        let inserted = active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id);
        inserted.then(|| Self {
            active: Arc::clone(active),
            job_id,
        })
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owns job creation and the lifecycle of every runner task.
pub struct JobEngine {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    credits: Arc<dyn CreditStore>,
    subscribers: Arc<SubscriberRegistry>,
    runner: Arc<PipelineRunner>,
    active: ActiveSet,
    tracker: TaskTracker,
    credit_cost: i64,
}

impl JobEngine {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        credits: Arc<dyn CreditStore>,
        executor: Arc<dyn StageExecutor>,
        subscribers: Arc<SubscriberRegistry>,
        config: EngineConfig,
    ) -> Self {
        let finalizers = Finalizers::new(Arc::clone(&artifacts), config.export_dir);
        let credit_cost = config.runner.credit_cost;
        let runner = PipelineRunner::new(
            Arc::clone(&jobs),
            Arc::clone(&artifacts),
            Arc::clone(&credits),
            executor,
            finalizers,
            Arc::clone(&subscribers),
            config.runner,
        );
        Self {
            jobs,
            artifacts,
            credits,
            subscribers,
            runner: Arc::new(runner),
            active: Arc::new(Mutex::new(HashSet::new())),
            tracker: TaskTracker::new(),
            credit_cost,
        }
    }

    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.subscribers
    }

    // ---- creation ----

    /// Validate a request, create the pending job and start its runner.
    ///
    /// On any error no job exists.
    pub async fn create_job(
        &self,
        owner_id: DbId,
        job_type: JobType,
        params: serde_json::Value,
    ) -> Result<JobCreated, CoreError> {
        self.submit(owner_id, job_type, params, None).await
    }

    /// Create a new job from a failed or cancelled job's parameters.
    pub async fn retry(&self, requester: Requester, job_id: JobId) -> Result<JobCreated, CoreError> {
        let original = self.find_authorized(requester, job_id, "retry").await?;
        if !matches!(original.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(CoreError::Validation(
                "Only failed or cancelled jobs can be retried".into(),
            ));
        }
        let created = self
            .submit(
                original.owner_id,
                original.job_type,
                original.parameters,
                Some(original.id),
            )
            .await?;
        tracing::info!(
            original_job_id = %job_id,
            new_job_id = %created.job_id,
            "Job retried",
        );
        Ok(created)
    }

    async fn submit(
        &self,
        owner_id: DbId,
        job_type: JobType,
        params: serde_json::Value,
        retry_of_job_id: Option<JobId>,
    ) -> Result<JobCreated, CoreError> {
        validate_for(job_type, &params)?;
        if job_type == JobType::Export {
            self.check_export_source(owner_id, &params).await?;
        }
        self.check_credits(owner_id).await?;

        let estimated_duration = estimate_duration_secs(job_type, &params);
        let job = self
            .jobs
            .create(NewJob {
                job_type,
                owner_id,
                parameters: params,
                total_stages: Pipeline::for_job_type(job_type).len() as i16,
                estimated_duration_secs: Some(estimated_duration),
                retry_of_job_id,
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job_type,
            owner_id,
            "Job created",
        );

        self.dispatch(job.id)?;
        Ok(JobCreated {
            job_id: job.id,
            estimated_duration,
        })
    }

    async fn check_credits(&self, owner_id: DbId) -> Result<(), CoreError> {
        let balance = self.credits.balance(owner_id).await?;
        let required = self.credit_cost.max(1);
        if balance < required {
            return Err(CoreError::InsufficientCredits(format!(
                "Balance is {balance}; {required} credit(s) required"
            )));
        }
        Ok(())
    }

    async fn check_export_source(
        &self,
        owner_id: DbId,
        params: &serde_json::Value,
    ) -> Result<(), CoreError> {
        let params: ExportParams = parse_params(params)?;
        let project = self
            .artifacts
            .find_project(params.project_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Project", params.project_id))?;
        if project.owner_id != owner_id {
            return Err(CoreError::Forbidden(
                "Cannot export another user's project".into(),
            ));
        }
        Ok(())
    }

    // ---- dispatch ----

    /// Spawn the runner for a pending job.
    ///
    /// Refused with `Conflict` while the job already has an active runner.
    pub fn dispatch(&self, job_id: JobId) -> Result<(), CoreError> {
        let guard = ActiveRun::claim(&self.active, job_id).ok_or_else(|| {
            CoreError::Conflict(format!("Job {job_id} already has an active runner"))
        })?;
        let runner = Arc::clone(&self.runner);

        self.tracker.spawn(async move {
            let _guard = guard;
            match runner.run(job_id).await {
                Ok(status) => {
                    tracing::debug!(job_id = %job_id, status = %status, "Runner finished");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Runner refused job");
                }
            }
        });
        Ok(())
    }

    /// Whether a runner task currently owns the job.
    pub fn is_active(&self, job_id: JobId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&job_id)
    }

    // ---- queries ----

    pub async fn get_status(
        &self,
        requester: Requester,
        job_id: JobId,
    ) -> Result<JobStatusView, CoreError> {
        let job = self.find_authorized(requester, job_id, "view").await?;
        Ok(JobStatusView::from_job(&job, chrono::Utc::now()))
    }

    /// The requester's own jobs, newest first.
    pub async fn list_jobs(
        &self,
        requester: Requester,
        query: &JobListQuery,
    ) -> Result<Vec<JobStatusView>, CoreError> {
        let now = chrono::Utc::now();
        let jobs = self.jobs.list(requester.owner_id, query).await?;
        Ok(jobs
            .iter()
            .map(|job| JobStatusView::from_job(job, now))
            .collect())
    }

    pub async fn credit_balance(&self, owner_id: DbId) -> Result<i64, CoreError> {
        Ok(self.credits.balance(owner_id).await?)
    }

    // ---- cancellation ----

    /// Request cooperative cancellation and return the current status.
    ///
    /// The runner observes the request at its next stage boundary. A job
    /// that is already terminal is returned unchanged.
    pub async fn cancel(
        &self,
        requester: Requester,
        job_id: JobId,
    ) -> Result<JobStatusView, CoreError> {
        let job = self.find_authorized(requester, job_id, "cancel").await?;
        if job.is_terminal() {
            return Ok(JobStatusView::from_job(&job, chrono::Utc::now()));
        }

        let job = match self
            .jobs
            .update(job_id, JobPatch::cancellation_requested())
            .await
        {
            Ok(job) => job,
            // Reached a terminal status since the read above.
            Err(DbError::Conflict(_)) => self.load(job_id).await?,
            Err(e) => return Err(e.into()),
        };
        tracing::info!(job_id = %job_id, owner_id = requester.owner_id, "Cancellation requested");

        // No runner will ever observe the flag on an orphaned pending job.
        let job = if job.status == JobStatus::Pending && !self.is_active(job_id) {
            self.cancel_orphaned(job).await?
        } else {
            job
        };

        Ok(JobStatusView::from_job(&job, chrono::Utc::now()))
    }

    async fn cancel_orphaned(&self, job: Job) -> Result<Job, CoreError> {
        match self
            .jobs
            .update(job.id, JobPatch::status(JobStatus::Cancelled))
            .await
        {
            Ok(cancelled) => {
                self.subscribers
                    .publish(
                        cancelled.id,
                        JobEvent::cancelled(cancelled.id, cancelled.progress_percent),
                    )
                    .await;
                self.subscribers.close_job(cancelled.id).await;
                Ok(cancelled)
            }
            Err(DbError::Conflict(_)) => self.load(job.id).await,
            Err(e) => Err(e.into()),
        }
    }

    // ---- live updates ----

    /// Open a live channel for a job.
    ///
    /// A terminal job yields a channel holding only its terminal snapshot,
    /// after which the stream ends.
    pub async fn subscribe(
        &self,
        requester: Requester,
        job_id: JobId,
    ) -> Result<Subscription, CoreError> {
        self.find_authorized(requester, job_id, "watch").await?;

        // Register before re-reading so a terminal event cannot slip between
        // the status check and the registration.
        let subscription = self.subscribers.subscribe(job_id).await;
        let job = self.load(job_id).await?;
        if !job.is_terminal() {
            return Ok(subscription);
        }

        self.subscribers.unsubscribe(job_id, subscription.id).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SubscriberMessage::Event(terminal_event(&job)));
        Ok(Subscription {
            id: subscription.id,
            job_id,
            receiver: rx,
        })
    }

    // ---- lifecycle ----

    /// Mark every unfinished job without a runner as failed, then settle
    /// the charges of completed jobs that were never debited.
    ///
    /// Run once at startup, before accepting requests. Returns the number
    /// of jobs marked failed.
    pub async fn recover_interrupted(&self) -> Result<usize, CoreError> {
        let mut recovered = 0;
        for job in self.jobs.list_unfinished().await? {
            if self.is_active(job.id) {
                continue;
            }
            match self
                .jobs
                .update(job.id, JobPatch::failed(INTERRUPTED_MESSAGE))
                .await
            {
                Ok(_) => recovered += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to recover job");
                }
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "Marked interrupted jobs as failed");
        }

        let mut settled = 0;
        for job in self.jobs.list_pending_charges().await? {
            if self.is_active(job.id) {
                continue;
            }
            if self.runner.settle_charge(&job).await {
                settled += 1;
            }
        }
        if settled > 0 {
            tracing::info!(settled, "Settled outstanding credit charges");
        }

        Ok(recovered)
    }

    /// Wait up to `timeout` for in-flight runners, then close every
    /// subscriber.
    ///
    /// Returns `true` when all runners finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Shutdown timeout reached with runners in flight",
            );
        }
        self.subscribers.shutdown_all().await;
        drained
    }

    // ---- helpers ----

    async fn load(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Job", job_id))
    }

    /// Fetch a job and verify the requester owns it (or is admin).
    async fn find_authorized(
        &self,
        requester: Requester,
        job_id: JobId,
        action: &str,
    ) -> Result<Job, CoreError> {
        let job = self.load(job_id).await?;
        if job.owner_id != requester.owner_id && !requester.is_admin {
            return Err(CoreError::Forbidden(format!(
                "Cannot {action} another user's job"
            )));
        }
        Ok(job)
    }
}

/// The event a terminal job ended with, rebuilt from the stored record.
fn terminal_event(job: &Job) -> JobEvent {
    let event = match job.status {
        JobStatus::Completed => {
            JobEvent::completed(job.id, job.result.clone().unwrap_or_default())
        }
        JobStatus::Failed => JobEvent::failed(
            job.id,
            job.progress_percent,
            job.error_message.clone().unwrap_or_default(),
        ),
        _ => JobEvent::cancelled(job.id, job.progress_percent),
    };
    event.with_stage(job.current_stage.clone())
}
