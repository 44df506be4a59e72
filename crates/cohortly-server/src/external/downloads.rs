use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{Months, NaiveDate};
use tracing::{info, warn};

use cohortly_core::dates;
use cohortly_core::external::DownloadReportApi;
use cohortly_core::model::ExternalField;
use cohortly_core::store::StatsBackend;

use super::load_cohort;

/// First day to request: the fixed epoch when no week has downloads yet,
/// otherwise the Monday of the week one month before `today`.
pub fn report_start(any_populated: bool, today: NaiveDate) -> NaiveDate {
    if !any_populated {
        return dates::week_zero_start();
    }
    let month_ago = today.checked_sub_months(Months::new(1)).unwrap_or(today);
    dates::start_of_week(month_ago).max(dates::week_zero_start())
}

/// Sum daily downloads into cohort weeks within `0..=this_week`.
pub fn weekly_totals(daily: &[(NaiveDate, i64)], this_week: i64) -> BTreeMap<i64, i64> {
    let mut weeks = BTreeMap::new();
    for (day, downloads) in daily {
        let week = dates::cohort_week_of_date(*day);
        if !(0..=this_week).contains(&week) {
            continue;
        }
        *weeks.entry(week).or_insert(0) += downloads;
    }
    weeks
}

/// Returns the number of cohort weeks written. Weeks with no report rows
/// keep their previous value.
pub async fn merge_downloads(
    store: &dyn StatsBackend,
    api: &dyn DownloadReportApi,
    today: NaiveDate,
) -> Result<usize> {
    let populated = store.count_cohorts_with(&ExternalField::Downloads).await? > 0;
    let start = report_start(populated, today);
    info!(start = %start, "Requesting download report");

    let daily = match api.daily_downloads(start).await {
        Ok(daily) => daily,
        Err(e) => {
            warn!(error = %e, "Download report request failed");
            return Ok(0);
        }
    };

    let weeks = weekly_totals(&daily, dates::cohort_week_of_date(today));
    for (week, downloads) in &weeks {
        let mut cohort = load_cohort(store, *week).await?;
        cohort.external.downloads = Some(*downloads);
        store.save_cohort_stats(&cohort).await?;
    }
    Ok(weeks.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn first_run_starts_at_epoch() {
        assert_eq!(report_start(false, day(2014, 5, 20)), dates::week_zero_start());
        // 2014-04-20 is a Sunday; its week opens on the 14th.
        assert_eq!(report_start(true, day(2014, 5, 20)), day(2014, 4, 14));
    }

    #[test]
    fn days_sum_into_weeks() {
        let daily = vec![
            (day(2013, 6, 3), 5),
            (day(2013, 6, 9), 2),
            (day(2013, 6, 10), 4),
            (day(2013, 5, 1), 100),
        ];
        let weeks = weekly_totals(&daily, 10);
        assert_eq!(weeks.get(&0), Some(&7));
        assert_eq!(weeks.get(&1), Some(&4));
        assert_eq!(weeks.len(), 2);
    }
}
