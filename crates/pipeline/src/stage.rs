//! Ordered, weighted stage lists for each job type.

use journal_core::job_type::JobType;
use journal_db::models::job::MAX_PROGRESS;

/// One step of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub name: &'static str,
    /// Share of total progress contributed when this stage completes.
    pub weight: i16,
    /// User-facing message sent with the stage's progress event.
    pub message: &'static str,
}

impl Stage {
    pub const fn new(name: &'static str, weight: i16, message: &'static str) -> Self {
        Self {
            name,
            weight,
            message,
        }
    }
}

/// Stages of a `content_generation` job.
pub const GENERATION_STAGES: &[Stage] = &[
    Stage::new("theme_analysis", 10, "Analyzing theme"),
    Stage::new("title_generation", 10, "Generating title"),
    Stage::new("outline", 15, "Drafting outline"),
    Stage::new("content_writing", 40, "Writing journal entries"),
    Stage::new("editing", 15, "Editing content"),
    Stage::new("media_prompts", 10, "Preparing media prompts"),
];

/// Stages of an `export` job.
pub const EXPORT_STAGES: &[Stage] = &[
    Stage::new("source_validation", 10, "Validating source project"),
    Stage::new("layout", 30, "Laying out pages"),
    Stage::new("rendering", 60, "Rendering document"),
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("A pipeline needs at least one stage")]
    Empty,

    #[error("Stage '{0}' has a non-positive weight")]
    NonPositiveWeight(&'static str),

    #[error("Stage weights sum to {0}, expected 100")]
    WeightSum(i32),
}

/// A validated stage list whose weights sum to exactly 100.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::Empty);
        }
        if let Some(stage) = stages.iter().find(|s| s.weight <= 0) {
            return Err(PipelineError::NonPositiveWeight(stage.name));
        }
        let total: i32 = stages.iter().map(|s| i32::from(s.weight)).sum();
        if total != i32::from(MAX_PROGRESS) {
            return Err(PipelineError::WeightSum(total));
        }
        Ok(Self { stages })
    }

    /// The built-in pipeline of a job type.
    pub fn for_job_type(job_type: JobType) -> Self {
        let stages = match job_type {
            JobType::ContentGeneration => GENERATION_STAGES,
            JobType::Export => EXPORT_STAGES,
        };
        Self {
            stages: stages.to_vec(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Cumulative progress once the stage at `index` has completed.
    pub fn progress_after(&self, index: usize) -> i16 {
        self.stages
            .iter()
            .take(index + 1)
            .map(|s| s.weight)
            .sum::<i16>()
            .min(MAX_PROGRESS)
    }
}
