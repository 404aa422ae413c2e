#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use journal_core::job_events::JobEvent;
use journal_core::types::{DbId, JobId};
use journal_db::error::DbError;
use journal_db::memory::{InMemoryArtifactStore, InMemoryCreditStore, InMemoryJobStore};
use journal_db::models::artifact::{NewProject, Project};
use journal_db::models::job::Job;
use journal_db::repositories::{ArtifactStore, CreditStore, JobStore};
use journal_pipeline::engine::{EngineConfig, JobEngine};
use journal_pipeline::executor::{
    FallbackExecutor, StageContext, StageError, StageExecutor, StageOutput,
};
use journal_pipeline::runner::RunnerConfig;
use journal_pipeline::stage::Stage;
use journal_pipeline::subscribers::{SubscriberMessage, SubscriberRegistry, Subscription};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Owner used by most tests.
pub const OWNER: DbId = 1;

/// Upper bound on how long a test waits for a job to settle.
pub const WAIT: Duration = Duration::from_secs(5);

/// An engine wired to in-memory stores, plus handles on those stores.
pub struct TestEngine {
    pub engine: JobEngine,
    pub jobs: Arc<InMemoryJobStore>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub credits: Arc<InMemoryCreditStore>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub export_dir: TempDir,
}

pub fn build_engine(executor: Arc<dyn StageExecutor>) -> TestEngine {
    build_engine_with(executor, RunnerConfig::default())
}

pub fn build_engine_with(executor: Arc<dyn StageExecutor>, runner: RunnerConfig) -> TestEngine {
    let jobs = Arc::new(InMemoryJobStore::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let credits = Arc::new(InMemoryCreditStore::new());
    let subscribers = Arc::new(SubscriberRegistry::new());
    let export_dir = tempfile::tempdir().unwrap();

    let engine = JobEngine::new(
        jobs.clone(),
        artifacts.clone(),
        credits.clone(),
        executor,
        subscribers.clone(),
        EngineConfig {
            runner,
            export_dir: export_dir.path().to_path_buf(),
        },
    );

    TestEngine {
        engine,
        jobs,
        artifacts,
        credits,
        subscribers,
        export_dir,
    }
}

impl TestEngine {
    pub async fn grant(&self, owner_id: DbId, amount: i64) {
        self.credits.grant(owner_id, amount).await;
    }

    pub async fn balance(&self, owner_id: DbId) -> i64 {
        self.credits.balance(owner_id).await.unwrap()
    }

    pub async fn job(&self, job_id: JobId) -> Job {
        self.jobs.get(job_id).await.unwrap().unwrap()
    }

    pub async fn job_count(&self, owner_id: DbId) -> usize {
        self.jobs
            .list(owner_id, &Default::default())
            .await
            .unwrap()
            .len()
    }

    /// Poll until the job is terminal and its runner has exited, so credit
    /// charges and terminal events have happened.
    pub async fn wait_terminal(&self, job_id: JobId) -> Job {
        tokio::time::timeout(WAIT, async {
            loop {
                let job = self.job(job_id).await;
                if job.is_terminal() && !self.engine.is_active(job_id) {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach a terminal status in time")
    }

    /// Store a project an export job can render.
    pub async fn seed_project(&self, owner_id: DbId) -> Project {
        self.artifacts
            .create_project(NewProject {
                owner_id,
                title: "Morning Pages".into(),
                content: serde_json::json!({
                    "entries": [
                        {"day": 1, "prompt": "What woke you up today?"},
                        {"day": 2, "prompt": "Name one small win."},
                        {"day": 3, "prompt": "What can wait until tomorrow?"},
                    ]
                }),
                metadata: serde_json::json!({}),
                source_job_id: None,
            })
            .await
            .unwrap()
    }
}

/// Drain a subscription until its stream ends, skipping pings.
pub async fn collect_events(mut subscription: Subscription) -> Vec<JobEvent> {
    tokio::time::timeout(WAIT, async {
        let mut events = Vec::new();
        while let Some(message) = subscription.receiver.recv().await {
            if let SubscriberMessage::Event(event) = message {
                events.push(event);
            }
        }
        events
    })
    .await
    .expect("subscription stream did not end in time")
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Fallback output, except the named stage fails.
pub struct FailingExecutor {
    pub stage: &'static str,
}

#[async_trait]
impl StageExecutor for FailingExecutor {
    async fn execute(&self, stage: &Stage, ctx: &StageContext) -> Result<StageOutput, StageError> {
        if stage.name == self.stage {
            return Err(StageError::Failed("model unavailable".into()));
        }
        FallbackExecutor::new().execute(stage, ctx).await
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Fallback output, except the named stage never finishes.
pub struct HangingExecutor {
    pub stage: &'static str,
}

#[async_trait]
impl StageExecutor for HangingExecutor {
    async fn execute(&self, stage: &Stage, ctx: &StageContext) -> Result<StageOutput, StageError> {
        if stage.name == self.stage {
            std::future::pending::<()>().await;
        }
        FallbackExecutor::new().execute(stage, ctx).await
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

/// Fallback output, but pauses inside the named stage until released.
///
/// `reached` fires when the stage starts; the stage returns after
/// `release` is notified.
pub struct GatedExecutor {
    pub stage: &'static str,
    pub reached: Notify,
    pub release: Notify,
    pub calls: AtomicUsize,
}

impl GatedExecutor {
    pub fn new(stage: &'static str) -> Arc<Self> {
        Arc::new(Self {
            stage,
            reached: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub async fn wait_reached(&self) {
        tokio::time::timeout(WAIT, self.reached.notified())
            .await
            .expect("gated stage was never reached");
    }

    pub fn open(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl StageExecutor for GatedExecutor {
    async fn execute(&self, stage: &Stage, ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if stage.name == self.stage {
            self.reached.notify_one();
            self.release.notified().await;
        }
        FallbackExecutor::new().execute(stage, ctx).await
    }

    fn name(&self) -> &str {
        "gated"
    }
}

// ---------------------------------------------------------------------------
// Credit stores
// ---------------------------------------------------------------------------

/// In-memory credits whose first `failures` charges fail with a store error.
pub struct FlakyCredits {
    pub inner: InMemoryCreditStore,
    failures: AtomicUsize,
    pub charge_calls: AtomicUsize,
}

impl FlakyCredits {
    pub fn new(balance: i64, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryCreditStore::with_default_balance(balance),
            failures: AtomicUsize::new(failures),
            charge_calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.charge_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CreditStore for FlakyCredits {
    async fn balance(&self, owner_id: DbId) -> Result<i64, DbError> {
        self.inner.balance(owner_id).await
    }

    async fn charge(&self, owner_id: DbId, job_id: JobId, amount: i64) -> Result<bool, DbError> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DbError::Conflict("credit ledger unavailable".into()));
        }
        self.inner.charge(owner_id, job_id, amount).await
    }
}
