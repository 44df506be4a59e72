use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use cohortly_core::dates;
use cohortly_core::external::{FunnelApi, FunnelSpec, FUNNELS};
use cohortly_core::model::ExternalField;
use cohortly_core::store::StatsBackend;

use super::load_cohort;

/// Weeks re-queried on a refresh run, counting the current one.
pub const REFRESH_WEEKS: i64 = 7;

/// Monday..Sunday window of a cohort week.
pub fn week_window(week: i64) -> (NaiveDate, NaiveDate) {
    let end = dates::cohort_date(week);
    (end - Duration::days(6), end)
}

/// Weeks that need a query for `funnel`: all of them on the first run,
/// otherwise the trailing window plus any week still missing the funnel.
async fn weeks_to_refresh(
    store: &dyn StatsBackend,
    funnel: &FunnelSpec,
    this_week: i64,
) -> Result<BTreeSet<i64>> {
    let field = ExternalField::Funnel(funnel.name.to_string());
    if store.count_cohorts_with(&field).await? == 0 {
        return Ok((0..=this_week).collect());
    }
    let populated: BTreeSet<i64> = store
        .list_cohort_stats()
        .await?
        .into_iter()
        .filter(|c| c.external.funnels.contains_key(funnel.name))
        .map(|c| c.cohort_week)
        .collect();
    let mut weeks: BTreeSet<i64> = (0..=this_week).filter(|w| !populated.contains(w)).collect();
    weeks.extend((this_week - REFRESH_WEEKS + 1).max(0)..=this_week);
    Ok(weeks)
}

/// Name each returned count after its step. Missing trailing steps count 0.
pub fn named_steps(funnel: &FunnelSpec, counts: &[i64]) -> BTreeMap<String, i64> {
    funnel
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| (step.to_string(), counts.get(i).copied().unwrap_or(0)))
        .collect()
}

/// Refresh every configured funnel. Returns the number of cohort weeks written.
pub async fn merge_funnels(
    store: &dyn StatsBackend,
    api: &dyn FunnelApi,
    today: NaiveDate,
) -> Result<usize> {
    let this_week = dates::cohort_week_of_date(today);
    let mut written = 0;
    for funnel in FUNNELS {
        let weeks = weeks_to_refresh(store, funnel, this_week).await?;
        info!(funnel = funnel.name, weeks = weeks.len(), "Updating funnel");
        for week in weeks {
            let (from, to) = week_window(week);
            let counts = match api.step_counts(funnel.funnel_id, from, to).await {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(funnel = funnel.name, week, error = %e, "Funnel query failed, week skipped");
                    continue;
                }
            };
            let mut cohort = load_cohort(store, week).await?;
            cohort
                .external
                .funnels
                .insert(funnel.name.to_string(), named_steps(funnel, &counts));
            store.save_cohort_stats(&cohort).await?;
            written += 1;
        }
    }
    Ok(written)
}
