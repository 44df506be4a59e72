use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::pipeline::{JobKind, JobStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    /// Caps the number of users compiled.
    pub limit: Option<usize>,
}

/// `POST /api/jobs/{job}`: run a stats job to completion.
///
/// Responds with the job outcome: `200` on success, `409` when another job
/// holds the run guard, `500` when the job failed.
#[tracing::instrument(skip(state))]
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(job): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<impl IntoResponse, AppError> {
    let kind = JobKind::parse(&job).ok_or_else(|| AppError::NotFound(format!("unknown job {job:?}")))?;
    if query.limit == Some(0) {
        return Err(AppError::BadRequest("limit must be at least 1".to_string()));
    }

    let outcome = state.jobs.run(kind, query.limit).await;
    let status = match outcome.status {
        JobStatus::Success => StatusCode::OK,
        JobStatus::AlreadyRunning => StatusCode::CONFLICT,
        JobStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(outcome)))
}
