use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{error, info, warn};

use cohortly_core::config::AD_TOKEN_SETTING;
use cohortly_core::dates;
use cohortly_core::external::{AdReportApi, AdReportRow};
use cohortly_core::model::ExternalField;
use cohortly_core::store::StatsBackend;

use super::load_cohort;

/// Weeks re-requested once every cohort has ad data.
pub const REFRESH_WEEKS: i64 = 2;

/// A report job submitted at the start of a run and collected at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdReportJob {
    pub job_id: String,
    pub token: String,
}

/// Report range as `(start, stop)`; `stop` is exclusive.
pub fn report_range(any_populated: bool, this_week: i64) -> (NaiveDate, NaiveDate) {
    let (start, weeks) = if any_populated {
        let start = dates::cohort_date(this_week) + chrono::Duration::days(1)
            - chrono::Duration::weeks(REFRESH_WEEKS);
        (start, REFRESH_WEEKS)
    } else {
        (dates::week_zero_start(), this_week + 1)
    };
    (start, start + chrono::Duration::weeks(weeks))
}

/// Per-run totals keyed by cohort week.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AdTotals {
    pub spend: BTreeMap<i64, f64>,
    pub installs: BTreeMap<i64, i64>,
}

impl AdTotals {
    /// Add one row. Rows spanning two cohort weeks are dropped and `false`
    /// is returned.
    pub fn add(&mut self, row: &AdReportRow) -> bool {
        let week = dates::cohort_week_of_date(row.date_start);
        let end_week = dates::cohort_week_of_date(row.date_stop);
        if week != end_week {
            warn!(week, end_week, "Skipping ad report row spanning two cohort weeks");
            return false;
        }
        *self.spend.entry(week).or_insert(0.0) += row.spend;
        *self.installs.entry(week).or_insert(0) += row.installs;
        true
    }

    pub fn weeks(&self) -> BTreeSet<i64> {
        self.spend.keys().chain(self.installs.keys()).copied().collect()
    }
}

/// Start the report job so it generates while the rest of the run proceeds.
/// Any failure, including a missing token, yields `None`.
pub async fn submit_ad_report(
    store: &dyn StatsBackend,
    api: &dyn AdReportApi,
    today: NaiveDate,
) -> Option<AdReportJob> {
    let token = match store.get_setting(AD_TOKEN_SETTING).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            error!("Missing ad API access token");
            return None;
        }
        Err(e) => {
            error!(error = %e, "Reading ad API access token failed");
            return None;
        }
    };
    let populated = match store.count_cohorts_with(&ExternalField::AdInstalls).await {
        Ok(n) => n > 0,
        Err(e) => {
            error!(error = %e, "Counting ad cohorts failed");
            return None;
        }
    };
    let (start, stop) = report_range(populated, dates::cohort_week_of_date(today));
    info!(start = %start, stop = %stop, "Submitting ad report job");
    match api.submit_report(&token, start, stop).await {
        Ok(job_id) => {
            info!(job_id = %job_id, "Ad report job submitted");
            Some(AdReportJob { job_id, token })
        }
        Err(e) => {
            error!(error = %e, "Ad report submit failed");
            None
        }
    }
}

/// Wait for `job`, page through its rows and write spend and installs for
/// every week found. Returns the number of cohort weeks written.
pub async fn finish_ad_report(
    store: &dyn StatsBackend,
    api: &dyn AdReportApi,
    job: &AdReportJob,
    poll_interval: Duration,
) -> Result<usize> {
    while !api.is_complete(&job.token, &job.job_id).await? {
        tokio::time::sleep(poll_interval).await;
    }

    let mut totals = AdTotals::default();
    let mut next: Option<String> = None;
    loop {
        let page = api.report_page(&job.token, &job.job_id, next.as_deref()).await?;
        for row in &page.rows {
            totals.add(row);
        }
        match page.next {
            Some(url) => next = Some(url),
            None => break,
        }
    }

    let weeks = totals.weeks();
    info!(weeks = ?weeks, "Ad report collected");
    for week in &weeks {
        let mut cohort = load_cohort(store, *week).await?;
        cohort.external.ad_installs = Some(totals.installs.get(week).copied().unwrap_or(0));
        cohort.external.ad_spend = Some(totals.spend.get(week).copied().unwrap_or(0.0));
        store.save_cohort_stats(&cohort).await?;
    }
    Ok(weeks.len())
}
