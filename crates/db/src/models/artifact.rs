//! Durable outputs of completed jobs: library projects and export files.

use journal_core::types::{DbId, JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::ProjectStatus;

/// A row from the `projects` table.
///
/// Generation jobs produce one project; export jobs read one.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: uuid::Uuid,
    pub owner_id: DbId,
    pub title: String,
    /// Entries and outline as produced by the generation pipeline.
    pub content: serde_json::Value,
    pub metadata: serde_json::Value,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: ProjectStatus,
    pub source_job_id: Option<JobId>,
    pub created_at: Timestamp,
}

/// Input for persisting a new project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub owner_id: DbId,
    pub title: String,
    pub content: serde_json::Value,
    pub metadata: serde_json::Value,
    pub source_job_id: Option<JobId>,
}

impl Project {
    /// Build a fresh draft project.
    pub fn new(input: NewProject, now: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            owner_id: input.owner_id,
            title: input.title,
            content: input.content,
            metadata: input.metadata,
            status: ProjectStatus::Draft,
            source_job_id: input.source_job_id,
            created_at: now,
        }
    }
}

/// A row from the `export_files` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExportFile {
    pub id: uuid::Uuid,
    pub owner_id: DbId,
    pub project_id: uuid::Uuid,
    pub format: String,
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub source_job_id: Option<JobId>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct NewExportFile {
    pub owner_id: DbId,
    pub project_id: uuid::Uuid,
    pub format: String,
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub source_job_id: Option<JobId>,
}

impl ExportFile {
    pub fn new(input: NewExportFile, now: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            owner_id: input.owner_id,
            project_id: input.project_id,
            format: input.format,
            file_name: input.file_name,
            file_path: input.file_path,
            size_bytes: input.size_bytes,
            source_job_id: input.source_job_id,
            created_at: now,
        }
    }
}
