//! Store for the `projects` and `export_files` tables.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::DbError;
use crate::models::artifact::{ExportFile, NewExportFile, NewProject, Project};

/// Column list for `projects` queries.
const PROJECT_COLUMNS: &str = "\
    id, owner_id, title, content, metadata, status_id, source_job_id, created_at";

/// Column list for `export_files` queries.
const EXPORT_COLUMNS: &str = "\
    id, owner_id, project_id, format, file_name, file_path, size_bytes, \
    source_job_id, created_at";

/// Persistence for job artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn create_project(&self, input: NewProject) -> Result<Project, DbError>;

    async fn find_project(&self, id: uuid::Uuid) -> Result<Option<Project>, DbError>;

    async fn create_export_file(&self, input: NewExportFile) -> Result<ExportFile, DbError>;
}

/// Postgres-backed [`ArtifactStore`].
#[derive(Clone)]
pub struct PgArtifactStore {
    pool: PgPool,
}

impl PgArtifactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactStore for PgArtifactStore {
    async fn create_project(&self, input: NewProject) -> Result<Project, DbError> {
        let project = Project::new(input, chrono::Utc::now());
        let query = format!(
            "INSERT INTO projects \
                 (id, owner_id, title, content, metadata, status_id, source_job_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {PROJECT_COLUMNS}"
        );
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(project.id)
            .bind(project.owner_id)
            .bind(&project.title)
            .bind(&project.content)
            .bind(&project.metadata)
            .bind(project.status.id())
            .bind(project.source_job_id)
            .bind(project.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(project)
    }

    async fn find_project(&self, id: uuid::Uuid) -> Result<Option<Project>, DbError> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1");
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(project)
    }

    async fn create_export_file(&self, input: NewExportFile) -> Result<ExportFile, DbError> {
        let file = ExportFile::new(input, chrono::Utc::now());
        let query = format!(
            "INSERT INTO export_files \
                 (id, owner_id, project_id, format, file_name, file_path, size_bytes, \
                  source_job_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {EXPORT_COLUMNS}"
        );
        let file = sqlx::query_as::<_, ExportFile>(&query)
            .bind(file.id)
            .bind(file.owner_id)
            .bind(file.project_id)
            .bind(&file.format)
            .bind(&file.file_name)
            .bind(&file.file_path)
            .bind(file.size_bytes)
            .bind(file.source_job_id)
            .bind(file.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(file)
    }
}
