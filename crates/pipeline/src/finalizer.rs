//! Materialize the artifact of a completed job and describe it for the
//! job's `result` field.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use journal_core::job_type::JobType;
use journal_core::params::{parse_params, ExportParams, GenerationParams};
use journal_db::error::DbError;
use journal_db::models::artifact::{NewExportFile, NewProject};
use journal_db::repositories::ArtifactStore;
use serde_json::{json, Value};

use crate::executor::StageContext;

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("stage '{0}' produced no usable output")]
    MissingOutput(&'static str),

    #[error("invalid job parameters: {0}")]
    InvalidParams(String),

    #[error("failed to write export file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to store artifact: {0}")]
    Store(#[from] DbError),
}

/// Turns the accumulated stage outputs into a durable artifact.
///
/// Called exactly once per job, only on the success path. The returned
/// value is stored as the job's result.
#[async_trait]
pub trait ResultFinalizer: Send + Sync {
    async fn finalize(&self, ctx: &StageContext) -> Result<Value, FinalizeError>;
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Persists a generated journal as a draft library project.
pub struct ProjectFinalizer {
    artifacts: Arc<dyn ArtifactStore>,
}

impl ProjectFinalizer {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl ResultFinalizer for ProjectFinalizer {
    async fn finalize(&self, ctx: &StageContext) -> Result<Value, FinalizeError> {
        let params: GenerationParams = parse_params(&ctx.parameters)
            .map_err(|e| FinalizeError::InvalidParams(e.to_string()))?;

        let title = ctx
            .output("title_generation")
            .and_then(|o| o.get("title"))
            .and_then(Value::as_str)
            .ok_or(FinalizeError::MissingOutput("title_generation"))?
            .to_string();

        // Edited entries win over the raw drafts.
        let entries = ["editing", "content_writing"]
            .iter()
            .find_map(|stage| ctx.output(stage).and_then(|o| o.get("entries")))
            .cloned()
            .ok_or(FinalizeError::MissingOutput("content_writing"))?;

        let outline = ctx.output("outline").cloned().unwrap_or(Value::Null);
        let media = ctx.output("media_prompts").cloned().unwrap_or(Value::Null);

        let project = self
            .artifacts
            .create_project(NewProject {
                owner_id: ctx.owner_id,
                title: title.clone(),
                content: json!({
                    "outline": outline,
                    "entries": entries,
                }),
                metadata: json!({
                    "theme": params.theme.trim(),
                    "style": params.style(),
                    "entry_count": params.entry_count(),
                    "media_prompts": media,
                }),
                source_job_id: Some(ctx.job_id),
            })
            .await?;

        tracing::info!(
            job_id = %ctx.job_id,
            project_id = %project.id,
            "Generated journal stored as project",
        );

        Ok(json!({
            "project_id": project.id,
            "title": title,
        }))
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Writes the rendered document to the export directory and records it.
pub struct ExportFinalizer {
    artifacts: Arc<dyn ArtifactStore>,
    export_dir: PathBuf,
}

impl ExportFinalizer {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts,
            export_dir: export_dir.into(),
        }
    }
}

#[async_trait]
impl ResultFinalizer for ExportFinalizer {
    async fn finalize(&self, ctx: &StageContext) -> Result<Value, FinalizeError> {
        let params: ExportParams = parse_params(&ctx.parameters)
            .map_err(|e| FinalizeError::InvalidParams(e.to_string()))?;
        let bytes = ctx
            .rendered
            .as_deref()
            .ok_or(FinalizeError::MissingOutput("rendering"))?;

        let title = ctx
            .source_project
            .as_ref()
            .map_or("export", |p| p.title.as_str());
        let file_name = format!(
            "{}-{}.{}",
            slugify(title),
            uuid::Uuid::now_v7(),
            params.format.extension()
        );

        tokio::fs::create_dir_all(&self.export_dir).await?;
        let path = self.export_dir.join(&file_name);
        tokio::fs::write(&path, bytes).await?;

        let record = self
            .artifacts
            .create_export_file(NewExportFile {
                owner_id: ctx.owner_id,
                project_id: params.project_id,
                format: params.format.as_str().to_string(),
                file_name: file_name.clone(),
                file_path: path.to_string_lossy().into_owned(),
                size_bytes: bytes.len() as i64,
                source_job_id: Some(ctx.job_id),
            })
            .await;
        let file = match record {
            Ok(file) => file,
            Err(e) => {
                // No record points at the file; do not leave it behind.
                if let Err(io) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        path = %path.display(),
                        error = %io,
                        "Failed to remove unrecorded export file",
                    );
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            job_id = %ctx.job_id,
            file_id = %file.id,
            size_bytes = file.size_bytes,
            "Export written",
        );

        Ok(json!({
            "file_id": file.id,
            "file_name": file.file_name,
            "file_path": file.file_path,
            "size_bytes": file.size_bytes,
            "format": file.format,
        }))
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// One finalizer per job type.
#[derive(Clone)]
pub struct Finalizers {
    pub generation: Arc<dyn ResultFinalizer>,
    pub export: Arc<dyn ResultFinalizer>,
}

impl Finalizers {
    /// The standard project and export finalizers sharing one artifact store.
    pub fn new(artifacts: Arc<dyn ArtifactStore>, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            generation: Arc::new(ProjectFinalizer::new(Arc::clone(&artifacts))),
            export: Arc::new(ExportFinalizer::new(artifacts, export_dir)),
        }
    }

    pub fn for_job_type(&self, job_type: JobType) -> &dyn ResultFinalizer {
        match job_type {
            JobType::ContentGeneration => self.generation.as_ref(),
            JobType::Export => self.export.as_ref(),
        }
    }
}

/// Lowercase ASCII slug for file names; falls back to `export`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "export".to_string()
    } else {
        slug.chars().take(60).collect()
    }
}
