//! Stage executors: the pluggable workers that perform each stage.
//!
//! Two implementations exist and are chosen once at startup:
//! - [`FallbackExecutor`] produces deterministic output locally;
//! - [`RemoteExecutor`] delegates each stage to an HTTP generator service.

mod fallback;
mod remote;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use journal_core::job_type::JobType;
use journal_core::types::{DbId, JobId};
use journal_db::models::artifact::Project;
use journal_db::models::job::Job;
use serde_json::{Map, Value};

use crate::stage::Stage;

pub use fallback::FallbackExecutor;
pub use remote::RemoteExecutor;

// ---------------------------------------------------------------------------
// Context and output
// ---------------------------------------------------------------------------

/// Everything a stage can read: the job's inputs plus the outputs of the
/// stages that ran before it.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: JobId,
    pub job_type: JobType,
    pub owner_id: DbId,
    pub parameters: Value,
    /// Output data of completed stages, keyed by stage name.
    pub outputs: Map<String, Value>,
    /// Binary document produced by the most recent stage that returned one.
    pub rendered: Option<Vec<u8>>,
    /// The project an export job renders.
    pub source_project: Option<Project>,
}

impl StageContext {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            owner_id: job.owner_id,
            parameters: job.parameters.clone(),
            outputs: Map::new(),
            rendered: None,
            source_project: None,
        }
    }

    pub fn output(&self, stage: &str) -> Option<&Value> {
        self.outputs.get(stage)
    }

    /// Store a stage's output for later stages and the finalizer.
    pub fn record(&mut self, stage: &str, output: StageOutput) {
        if let Some(bytes) = output.bytes {
            self.rendered = Some(bytes);
        }
        self.outputs.insert(stage.to_string(), output.data);
    }
}

/// Result of one stage.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub data: Value,
    pub bytes: Option<Vec<u8>>,
}

impl StageOutput {
    pub fn data(data: Value) -> Self {
        Self { data, bytes: None }
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = Some(bytes);
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    #[error("generator request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The generator answered with a non-2xx status.
    #[error("generator returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid generator response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("executor misconfigured: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Trait and factory
// ---------------------------------------------------------------------------

/// Performs the work of a single stage.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, stage: &Stage, ctx: &StageContext) -> Result<StageOutput, StageError>;

    /// Executor name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    Fallback,
    Remote,
}

impl FromStr for ExecutorMode {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fallback" => Ok(Self::Fallback),
            "remote" => Ok(Self::Remote),
            other => Err(StageError::Config(format!(
                "unknown executor mode '{other}', expected 'fallback' or 'remote'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub mode: ExecutorMode,
    /// Base URL of the generator service; required in remote mode.
    pub generator_url: Option<String>,
    pub request_timeout: Duration,
}

/// Build the executor selected by `config`.
pub fn create_executor(config: &ExecutorConfig) -> Result<Arc<dyn StageExecutor>, StageError> {
    match config.mode {
        ExecutorMode::Fallback => Ok(Arc::new(FallbackExecutor::new())),
        ExecutorMode::Remote => {
            let url = config.generator_url.as_deref().ok_or_else(|| {
                StageError::Config("GENERATOR_URL is required in remote mode".into())
            })?;
            Ok(Arc::new(RemoteExecutor::new(url, config.request_timeout)?))
        }
    }
}
