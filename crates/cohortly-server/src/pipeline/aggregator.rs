use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::future::join_all;
use tracing::{error, info};

use cohortly_core::cohort::CohortAccumulator;
use cohortly_core::dates;
use cohortly_core::model::{CohortStats, UserStats};
use cohortly_core::paging::{Page, PageSource, Pager};
use cohortly_core::store::{RelatedRequest, StatsBackend};

/// Rows read per page while scanning one cohort.
pub const COHORT_PAGE_SIZE: usize = 500;

/// The stats rows of one cohort week, in user-id order.
struct CohortRows<'a> {
    store: &'a dyn StatsBackend,
    cohort: i64,
}

#[async_trait]
impl<'a> PageSource for CohortRows<'a> {
    type Row = UserStats;

    async fn fetch_page(&self, after: Option<&str>, limit: usize) -> Result<Page<UserStats>> {
        self.store.user_stats_page(self.cohort, after, limit).await
    }
}

/// Rebuild the user section of one cohort record. `existing` is the stored
/// record, if any; its external section is kept as-is.
pub async fn aggregate_week(
    store: &dyn StatsBackend,
    week: i64,
    existing: Option<CohortStats>,
    page_size: usize,
) -> Result<CohortStats> {
    let mut pager = Pager::new(CohortRows { store, cohort: week }, page_size);
    let mut acc = CohortAccumulator::new();
    while let Some(rows) = pager.next_page().await? {
        for row in &rows {
            acc.add(&row.fields);
        }
    }

    let mut record = existing.unwrap_or_else(|| CohortStats::new(week));
    record.user = Some(acc.finish());
    store.save_cohort_stats(&record).await?;
    Ok(record)
}

/// Aggregate every cohort week from zero through the week of `today`.
/// Weeks run concurrently; a failed week is logged and does not stop the
/// others. Returns the number of weeks written.
pub async fn aggregate_all(store: &dyn StatsBackend, today: NaiveDate) -> Result<usize> {
    let this_week = dates::cohort_week_of_date(today);
    if this_week < 0 {
        return Ok(0);
    }
    let mut related = store
        .fetch_related(&[RelatedRequest::cohort_stats(0..=this_week)])
        .await?;

    let work = (0..=this_week).map(|week| {
        let existing = related.cohort_stats.remove(&week);
        async move {
            (
                week,
                aggregate_week(store, week, existing, COHORT_PAGE_SIZE).await,
            )
        }
    });

    let mut written = 0;
    for (week, result) in join_all(work).await {
        match result {
            Ok(_) => written += 1,
            Err(e) => error!(week, error = %e, "Cohort aggregation failed"),
        }
    }
    info!(weeks = this_week + 1, written, "Cohort aggregation finished");
    Ok(written)
}
