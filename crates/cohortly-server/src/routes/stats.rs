use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use cohortly_core::store::StatsBackend;

use crate::error::AppError;
use crate::state::AppState;

/// `GET /api/stats/counts`: row counts of the user and stats tables.
#[tracing::instrument(skip(state))]
pub async fn counts(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let counts = state.db.counts().await.map_err(AppError::Internal)?;
    Ok(Json(counts))
}
