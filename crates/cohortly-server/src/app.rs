use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// `TraceLayer` gives structured request/response logging via `tracing`.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/jobs/{job}", post(routes::jobs::run_job))
        .route("/api/stats/counts", get(routes::stats::counts))
        .route("/api/cohorts.csv", get(routes::export::export_cohorts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
