//! In-memory store implementations.
//!
//! Used when no `DATABASE_URL` is configured and by every test suite. They
//! honour the same contracts as the Postgres stores: job updates are
//! serialized behind a write lock and validated by [`Job::apply_patch`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use journal_core::types::{DbId, JobId};
use tokio::sync::RwLock;

use crate::error::DbError;
use crate::models::artifact::{ExportFile, NewExportFile, NewProject, Project};
use crate::models::job::{Job, JobListQuery, JobPatch, NewJob};
use crate::models::status::JobStatus;
use crate::repositories::{ArtifactStore, CreditStore, JobStore};

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, input: NewJob) -> Result<Job, DbError> {
        let job = Job::new(input, chrono::Utc::now());
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, DbError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, id: JobId, patch: JobPatch) -> Result<Job, DbError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&id)
            .ok_or_else(|| DbError::not_found("Job", id))?;
        stored.apply_patch(patch, chrono::Utc::now())?;
        Ok(stored.clone())
    }

    async fn list(&self, owner_id: DbId, query: &JobListQuery) -> Result<Vec<Job>, DbError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| job.owner_id == owner_id && query.matches(job))
            .cloned()
            .collect();
        // v7 ids are time-ordered, which breaks ties between equal timestamps.
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(matching
            .into_iter()
            .skip(query.effective_offset() as usize)
            .take(query.effective_limit() as usize)
            .collect())
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, DbError> {
        let jobs = self.jobs.read().await;
        let mut unfinished: Vec<Job> = jobs
            .values()
            .filter(|job| !job.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by_key(|job| (job.created_at, job.id));
        Ok(unfinished)
    }

    async fn settle_charge(&self, id: JobId) -> Result<Job, DbError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&id)
            .ok_or_else(|| DbError::not_found("Job", id))?;
        stored.settle_charge(chrono::Utc::now())?;
        Ok(stored.clone())
    }

    async fn list_pending_charges(&self) -> Result<Vec<Job>, DbError> {
        let jobs = self.jobs.read().await;
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|job| job.charge_pending && job.status == JobStatus::Completed)
            .cloned()
            .collect();
        pending.sort_by_key(|job| (job.completed_at, job.id));
        Ok(pending)
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryArtifactStore {
    projects: RwLock<HashMap<uuid::Uuid, Project>>,
    export_files: RwLock<HashMap<uuid::Uuid, ExportFile>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn create_project(&self, input: NewProject) -> Result<Project, DbError> {
        let project = Project::new(input, chrono::Utc::now());
        self.projects
            .write()
            .await
            .insert(project.id, project.clone());
        Ok(project)
    }

    async fn find_project(&self, id: uuid::Uuid) -> Result<Option<Project>, DbError> {
        Ok(self.projects.read().await.get(&id).cloned())
    }

    async fn create_export_file(&self, input: NewExportFile) -> Result<ExportFile, DbError> {
        let file = ExportFile::new(input, chrono::Utc::now());
        self.export_files
            .write()
            .await
            .insert(file.id, file.clone());
        Ok(file)
    }
}

// ---------------------------------------------------------------------------
// Credits
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CreditLedger {
    balances: HashMap<DbId, i64>,
    charged_jobs: HashSet<JobId>,
}

/// In-memory [`CreditStore`]. Balance and ledger share one lock so a charge
/// is atomic.
#[derive(Default)]
pub struct InMemoryCreditStore {
    ledger: RwLock<CreditLedger>,
    default_balance: i64,
}

impl InMemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owners without an account start with `balance` credits.
    pub fn with_default_balance(balance: i64) -> Self {
        Self {
            ledger: RwLock::default(),
            default_balance: balance,
        }
    }

    /// Add `amount` to an owner's balance and return the new balance.
    ///
    /// Seeds accounts for local runs and test suites; the Postgres store
    /// has no counterpart.
    pub async fn grant(&self, owner_id: DbId, amount: i64) -> i64 {
        let mut ledger = self.ledger.write().await;
        let default_balance = self.default_balance;
        let balance = ledger.balances.entry(owner_id).or_insert(default_balance);
        *balance += amount;
        *balance
    }
}

#[async_trait]
impl CreditStore for InMemoryCreditStore {
    async fn balance(&self, owner_id: DbId) -> Result<i64, DbError> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .balances
            .get(&owner_id)
            .copied()
            .unwrap_or(self.default_balance))
    }

    async fn charge(&self, owner_id: DbId, job_id: JobId, amount: i64) -> Result<bool, DbError> {
        let mut ledger = self.ledger.write().await;
        if !ledger.charged_jobs.insert(job_id) {
            return Ok(false);
        }
        let default_balance = self.default_balance;
        *ledger.balances.entry(owner_id).or_insert(default_balance) -= amount;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use journal_core::job_type::JobType;

    fn new_job(owner_id: DbId, job_type: JobType) -> NewJob {
        NewJob {
            job_type,
            owner_id,
            parameters: serde_json::json!({"theme": "gratitude"}),
            total_stages: 6,
            estimated_duration_secs: Some(120),
            retry_of_job_id: None,
        }
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn update_unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let result = store
            .update(uuid::Uuid::now_v7(), JobPatch::status(JobStatus::Running))
            .await;
        assert_matches!(result, Err(DbError::NotFound { entity: "Job", .. }));
    }

    #[tokio::test]
    async fn rejected_patch_leaves_record_untouched() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(1, JobType::ContentGeneration)).await.unwrap();

        let result = store
            .update(job.id, JobPatch::completed(serde_json::json!({})))
            .await;
        assert_matches!(result, Err(DbError::Conflict(_)));

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.result.is_none());
    }

    #[tokio::test]
    async fn list_filters_by_owner_status_and_type() {
        let store = InMemoryJobStore::new();
        let a = store.create(new_job(1, JobType::ContentGeneration)).await.unwrap();
        store.create(new_job(1, JobType::Export)).await.unwrap();
        store.create(new_job(2, JobType::ContentGeneration)).await.unwrap();
        store
            .update(a.id, JobPatch::status(JobStatus::Cancelled))
            .await
            .unwrap();

        let all = store.list(1, &JobListQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let cancelled = store
            .list(
                1,
                &JobListQuery {
                    status: Some(JobStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, a.id);

        let exports = store
            .list(
                1,
                &JobListQuery {
                    job_type: Some(JobType::Export),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].job_type, JobType::Export);
    }

    #[tokio::test]
    async fn list_pages_newest_first() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(store.create(new_job(3, JobType::Export)).await.unwrap().id);
        }

        let page = store
            .list(
                3,
                &JobListQuery {
                    limit: Some(2),
                    offset: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[3]);
        assert_eq!(page[1].id, ids[2]);
    }

    #[tokio::test]
    async fn list_unfinished_skips_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let pending = store.create(new_job(1, JobType::Export)).await.unwrap();
        let cancelled = store.create(new_job(1, JobType::Export)).await.unwrap();
        store
            .update(cancelled.id, JobPatch::status(JobStatus::Cancelled))
            .await
            .unwrap();

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, pending.id);
    }

    #[tokio::test]
    async fn settled_charges_leave_the_pending_list() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(1, JobType::ContentGeneration)).await.unwrap();
        store
            .update(job.id, JobPatch::status(JobStatus::Running))
            .await
            .unwrap();
        store
            .update(job.id, JobPatch::completed(serde_json::json!({})))
            .await
            .unwrap();

        let pending = store.list_pending_charges().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, job.id);

        let settled = store.settle_charge(job.id).await.unwrap();
        assert!(!settled.charge_pending);
        assert!(store.list_pending_charges().await.unwrap().is_empty());
        assert_matches!(
            store.settle_charge(uuid::Uuid::now_v7()).await,
            Err(DbError::NotFound { entity: "Job", .. })
        );
    }

    // -----------------------------------------------------------------------
    // Credits
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn charge_is_idempotent_per_job() {
        let store = InMemoryCreditStore::new();
        store.grant(5, 3).await;
        let job_id = uuid::Uuid::now_v7();

        assert!(store.charge(5, job_id, 1).await.unwrap());
        assert!(!store.charge(5, job_id, 1).await.unwrap());
        assert_eq!(store.balance(5).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn default_balance_applies_to_new_owners() {
        let store = InMemoryCreditStore::with_default_balance(10);
        assert_eq!(store.balance(99).await.unwrap(), 10);
        assert_eq!(store.grant(99, 5).await, 15);
        assert_eq!(InMemoryCreditStore::new().balance(99).await.unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn projects_are_stored_as_drafts() {
        let store = InMemoryArtifactStore::new();
        let project = store
            .create_project(NewProject {
                owner_id: 4,
                title: "Quiet Mornings".into(),
                content: serde_json::json!({"entries": []}),
                metadata: serde_json::json!({}),
                source_job_id: None,
            })
            .await
            .unwrap();

        let found = store.find_project(project.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Quiet Mornings");
        assert_eq!(found.status, crate::models::status::ProjectStatus::Draft);
        assert!(store.find_project(uuid::Uuid::now_v7()).await.unwrap().is_none());
    }
}
