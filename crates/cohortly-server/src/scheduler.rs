use std::sync::Arc;

use tracing::{info, warn};

use crate::pipeline::{JobKind, JobStatus};
use crate::state::AppState;

/// Run the full stats update every `schedule_interval`, starting immediately.
pub async fn run_scheduler_loop(state: Arc<AppState>) {
    let every = state.config.schedule_interval();
    info!(interval_seconds = every.as_secs(), "Stats scheduler started");
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let outcome = state.jobs.run(JobKind::FullStatsUpdate, None).await;
        match outcome.status {
            JobStatus::Success => info!(count = outcome.count, message = %outcome.message, "Scheduled stats update finished"),
            JobStatus::AlreadyRunning => info!("Scheduled stats update skipped, a job is already running"),
            JobStatus::Failed => warn!(message = %outcome.message, "Scheduled stats update failed"),
        }
    }
}
