use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use cohortly_core::model::UserProfile;
use cohortly_core::paging::{Page, PageSource, Pager};
use cohortly_core::store::StatsBackend;

use crate::config::Config;
use crate::external::{ads, downloads, funnels, ExternalApis};
use crate::pipeline::{aggregator, compiler};

/// Users visited per page when walking stats references.
const USER_PAGE_SIZE: usize = 100;

/// The invokable batch jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Purge, compile, aggregate, then merge external metrics.
    FullStatsUpdate,
    /// Purge, compile and aggregate only.
    UserAndCohortOnly,
    /// Delete every user stats row and unset the user-side references.
    ClearStats,
    /// Flag every active user with stats for recompilation.
    MarkAllDirty,
}

impl JobKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "full-stats-update" => Some(Self::FullStatsUpdate),
            "user-and-cohort-only" => Some(Self::UserAndCohortOnly),
            "clear-stats" => Some(Self::ClearStats),
            "mark-all-dirty" => Some(Self::MarkAllDirty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullStatsUpdate => "full-stats-update",
            Self::UserAndCohortOnly => "user-and-cohort-only",
            Self::ClearStats => "clear-stats",
            Self::MarkAllDirty => "mark-all-dirty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub message: String,
    pub count: usize,
}

impl JobOutcome {
    fn success(message: String, count: usize) -> Self {
        Self {
            status: JobStatus::Success,
            message,
            count,
        }
    }
}

/// Users that hold a stats reference, optionally only blocked/deleted ones.
struct StatsHolders<'a> {
    store: &'a dyn StatsBackend,
    inactive_only: bool,
}

#[async_trait]
impl<'a> PageSource for StatsHolders<'a> {
    type Row = UserProfile;

    async fn fetch_page(&self, after: Option<&str>, limit: usize) -> Result<Page<UserProfile>> {
        if self.inactive_only {
            self.store.inactive_users_with_stats(after, limit).await
        } else {
            self.store.users_with_stats(after, limit).await
        }
    }
}

/// Runs batch jobs one at a time.
pub struct Orchestrator {
    store: Arc<dyn StatsBackend>,
    apis: ExternalApis,
    config: Arc<Config>,
    run_guard: Mutex<()>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn StatsBackend>, apis: ExternalApis, config: Arc<Config>) -> Self {
        Self {
            store,
            apis,
            config,
            run_guard: Mutex::new(()),
        }
    }

    pub async fn run(&self, job: JobKind, limit: Option<usize>) -> JobOutcome {
        self.run_at(job, limit, Utc::now().date_naive()).await
    }

    /// Run `job` as of `today`. `limit` caps the number of users compiled.
    /// A job already in progress makes this return `AlreadyRunning` at once.
    pub async fn run_at(&self, job: JobKind, limit: Option<usize>, today: NaiveDate) -> JobOutcome {
        let Ok(_guard) = self.run_guard.try_lock() else {
            warn!(job = job.as_str(), "Stats job rejected, another job is running");
            return JobOutcome {
                status: JobStatus::AlreadyRunning,
                message: "another stats job is already running".to_string(),
                count: 0,
            };
        };

        info!(job = job.as_str(), ?limit, "Stats job started");
        let started = std::time::Instant::now();
        let result = match job {
            JobKind::FullStatsUpdate => self.update(limit, today, true).await,
            JobKind::UserAndCohortOnly => self.update(limit, today, false).await,
            JobKind::ClearStats => self.clear_stats().await,
            JobKind::MarkAllDirty => self.mark_all_dirty().await,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                info!(job = job.as_str(), count = outcome.count, elapsed_ms, "Stats job finished");
                outcome
            }
            Err(e) => {
                error!(job = job.as_str(), error = %e, elapsed_ms, "Stats job failed");
                JobOutcome {
                    status: JobStatus::Failed,
                    message: format!("{e:#}"),
                    count: 0,
                }
            }
        }
    }

    async fn update(&self, limit: Option<usize>, today: NaiveDate, external: bool) -> Result<JobOutcome> {
        let store = self.store.as_ref();

        let ad_job = match (&self.apis.ads, external) {
            (Some(api), true) => ads::submit_ad_report(store, api.as_ref(), today).await,
            _ => None,
        };

        let purged = self.purge_inactive().await?;
        let compiled = compiler::compile_pending(
            store,
            self.apis.people.as_deref(),
            self.config.user_batch_size,
            limit,
        )
        .await?;
        let weeks = aggregator::aggregate_all(store, today).await?;

        let mut message = format!(
            "purged {purged} users, compiled {compiled} users, aggregated {weeks} cohort weeks"
        );
        if external {
            let merged = self.merge_external(today, ad_job).await?;
            message.push_str(&format!(", merged {merged} external cohort weeks"));
        }
        Ok(JobOutcome::success(message, compiled))
    }

    /// Funnels, downloads, then ads. Unconfigured APIs are skipped.
    async fn merge_external(&self, today: NaiveDate, ad_job: Option<ads::AdReportJob>) -> Result<usize> {
        let store = self.store.as_ref();
        let mut merged = 0;

        match &self.apis.funnels {
            Some(api) => merged += funnels::merge_funnels(store, api.as_ref(), today).await?,
            None => info!("Funnel API not configured, skipping"),
        }
        match &self.apis.downloads {
            Some(api) => merged += downloads::merge_downloads(store, api.as_ref(), today).await?,
            None => info!("Download report API not configured, skipping"),
        }
        match (&self.apis.ads, ad_job) {
            (Some(api), Some(job)) => {
                match ads::finish_ad_report(store, api.as_ref(), &job, self.config.ad_poll_interval())
                    .await
                {
                    Ok(weeks) => merged += weeks,
                    Err(e) => error!(job_id = %job.job_id, error = %e, "Ad report collection failed"),
                }
            }
            (Some(_), None) => warn!("No ad report job, skipping ad stats"),
            (None, _) => info!("Ad API not configured, skipping"),
        }
        Ok(merged)
    }

    /// Drop the stats of users that were blocked or deleted since their
    /// stats were compiled.
    async fn purge_inactive(&self) -> Result<usize> {
        let store = self.store.as_ref();
        let mut pager = Pager::new(
            StatsHolders {
                store,
                inactive_only: true,
            },
            USER_PAGE_SIZE,
        );
        let mut purged = 0;
        while let Some(users) = pager.next_page().await? {
            for user in users {
                if let Some(stats_id) = user.stats_id.as_deref() {
                    store.delete_user_stats(stats_id).await?;
                }
                store.clear_user_stats_ref(&user.id).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "Stats of inactive users purged");
        }
        Ok(purged)
    }

    async fn clear_stats(&self) -> Result<JobOutcome> {
        let store = self.store.as_ref();
        let mut pager = Pager::new(
            StatsHolders {
                store,
                inactive_only: false,
            },
            USER_PAGE_SIZE,
        );
        let mut unlinked = 0;
        while let Some(users) = pager.next_page().await? {
            for user in users {
                store.clear_user_stats_ref(&user.id).await?;
                unlinked += 1;
            }
        }

        let mut deleted = 0;
        loop {
            let n = store.delete_user_stats_batch(USER_PAGE_SIZE).await?;
            if n == 0 {
                break;
            }
            deleted += n;
        }
        Ok(JobOutcome::success(
            format!("deleted {deleted} user stats rows, unlinked {unlinked} users"),
            deleted,
        ))
    }

    async fn mark_all_dirty(&self) -> Result<JobOutcome> {
        let mut marked = 0;
        loop {
            let n = self
                .store
                .mark_clean_users_dirty(self.config.dirty_batch_size)
                .await?;
            if n == 0 {
                break;
            }
            marked += n;
        }
        Ok(JobOutcome::success(format!("marked {marked} users for update"), marked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_round_trip() {
        for job in [
            JobKind::FullStatsUpdate,
            JobKind::UserAndCohortOnly,
            JobKind::ClearStats,
            JobKind::MarkAllDirty,
        ] {
            assert_eq!(JobKind::parse(job.as_str()), Some(job));
        }
        assert_eq!(JobKind::parse("drop-everything"), None);
    }

    #[test]
    fn outcome_serializes_snake_case_status() {
        let outcome = JobOutcome {
            status: JobStatus::AlreadyRunning,
            message: "busy".to_string(),
            count: 0,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "already_running");
    }
}
