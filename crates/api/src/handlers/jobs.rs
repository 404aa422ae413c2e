//! Handlers for the `/jobs` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. Owners see only
//! their own jobs; admins may view and cancel any job.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use journal_core::job_type::JobType;
use journal_core::types::JobId;
use journal_db::models::job::JobListQuery;
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// `content_generation` or `export`; parsed here so an unknown type is
    /// a validation error rather than a body rejection.
    pub job_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate the request and the caller's balance, create a pending job and
/// start it. Returns 201 with `{job_id, estimated_duration}`.
pub async fn create_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    let job_type: JobType = input.job_type.parse()?;
    let created = state
        .engine
        .create_job(auth.user_id, job_type, input.params)
        .await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: created })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// The caller's jobs, newest first. Supports optional `status`,
/// `job_type`, `limit` and `offset` query parameters.
pub async fn list_jobs(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.engine.list_jobs(auth.requester(), &params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let view = state.engine.get_status(auth.requester(), job_id).await?;
    Ok(Json(DataResponse { data: view }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Request cancellation and return the job's current status. Cancelling a
/// job that already finished is a no-op.
pub async fn cancel_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let view = state.engine.cancel(auth.requester(), job_id).await?;
    Ok(Json(DataResponse { data: view }))
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/retry
///
/// Create a new job with the parameters of a failed or cancelled one.
/// Returns 201 with the new job's id.
pub async fn retry_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let created = state.engine.retry(auth.requester(), job_id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: created })))
}
