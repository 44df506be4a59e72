use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::NaiveDate;

use cohortly_core::cohort::CohortUserMetrics;
use cohortly_core::dates;
use cohortly_core::model::{CohortStats, ExternalField, ExternalMetrics};

use crate::DuckDbBackend;

type RawCohort = (i64, String, Option<String>, Option<i64>, Option<i64>, Option<f64>);

const COHORT_COLUMNS: &str =
    "cohort_week, CAST(cohort_date AS VARCHAR), user_metrics, downloads, ad_installs, ad_spend";

fn map_raw(row: &duckdb::Row<'_>) -> duckdb::Result<RawCohort> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode(
    (cohort_week, cohort_date, user_metrics, downloads, ad_installs, ad_spend): RawCohort,
    funnels: BTreeMap<String, BTreeMap<String, i64>>,
) -> Result<CohortStats> {
    let user = user_metrics
        .map(|raw| serde_json::from_str::<CohortUserMetrics>(&raw))
        .transpose()
        .with_context(|| format!("cohort {cohort_week}: bad user metrics json"))?;
    Ok(CohortStats {
        cohort_week,
        cohort_date: NaiveDate::parse_from_str(&cohort_date, "%Y-%m-%d")
            .unwrap_or_else(|_| dates::cohort_date(cohort_week)),
        user,
        external: ExternalMetrics {
            downloads,
            ad_installs,
            ad_spend,
            funnels,
        },
    })
}

/// Loads cohort rows (all of them when `weeks` is `None`) with their funnel
/// steps, ordered by week.
pub(crate) async fn load_cohorts(db: &DuckDbBackend, weeks: Option<&[i64]>) -> Result<Vec<CohortStats>> {
    if weeks.is_some_and(|w| w.is_empty()) {
        return Ok(Vec::new());
    }
    let conn = db.conn.lock().await;
    let (filter, params): (String, Vec<i64>) = match weeks {
        Some(weeks) => {
            let placeholders: Vec<String> = (1..=weeks.len()).map(|i| format!("?{i}")).collect();
            (
                format!(" WHERE cohort_week IN ({})", placeholders.join(", ")),
                weeks.to_vec(),
            )
        }
        None => (String::new(), Vec::new()),
    };
    let param_refs: Vec<&dyn duckdb::types::ToSql> =
        params.iter().map(|w| w as &dyn duckdb::types::ToSql).collect();

    let mut rows_raw = Vec::new();
    {
        let sql = format!("SELECT {COHORT_COLUMNS} FROM cohort_stats{filter} ORDER BY cohort_week");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_raw)?;
        for row in rows {
            rows_raw.push(row?);
        }
    }

    let mut funnels: HashMap<i64, BTreeMap<String, BTreeMap<String, i64>>> = HashMap::new();
    {
        let sql = format!(
            "SELECT cohort_week, funnel, step, count FROM cohort_funnel_steps{filter} \
             ORDER BY cohort_week, funnel, step"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        for row in rows {
            let (week, funnel, step, count) = row?;
            funnels
                .entry(week)
                .or_default()
                .entry(funnel)
                .or_default()
                .insert(step, count);
        }
    }
    drop(conn);

    rows_raw
        .into_iter()
        .map(|raw| {
            let steps = funnels.remove(&raw.0).unwrap_or_default();
            decode(raw, steps)
        })
        .collect()
}

pub(crate) async fn cohort_stats_inner(db: &DuckDbBackend, week: i64) -> Result<Option<CohortStats>> {
    Ok(load_cohorts(db, Some(&[week])).await?.into_iter().next())
}

/// Full-record upsert. Funnel steps of the week are replaced by the ones on
/// `stats`.
pub(crate) async fn save_cohort_stats_inner(db: &DuckDbBackend, stats: &CohortStats) -> Result<()> {
    let user_metrics = stats.user.as_ref().map(serde_json::to_string).transpose()?;
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    tx.execute(
        r#"INSERT INTO cohort_stats (cohort_week, cohort_date, user_metrics, downloads, ad_installs, ad_spend, updated_at)
           VALUES (?1, CAST(?2 AS DATE), ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP)
           ON CONFLICT (cohort_week) DO UPDATE SET
               cohort_date = EXCLUDED.cohort_date,
               user_metrics = EXCLUDED.user_metrics,
               downloads = EXCLUDED.downloads,
               ad_installs = EXCLUDED.ad_installs,
               ad_spend = EXCLUDED.ad_spend,
               updated_at = EXCLUDED.updated_at"#,
        duckdb::params![
            stats.cohort_week,
            dates::format_day(stats.cohort_date),
            user_metrics,
            stats.external.downloads,
            stats.external.ad_installs,
            stats.external.ad_spend,
        ],
    )?;
    tx.execute(
        "DELETE FROM cohort_funnel_steps WHERE cohort_week = ?1",
        duckdb::params![stats.cohort_week],
    )?;
    for (funnel, steps) in &stats.external.funnels {
        for (step, count) in steps {
            tx.execute(
                "INSERT INTO cohort_funnel_steps (cohort_week, funnel, step, count) \
                 VALUES (?1, ?2, ?3, ?4)",
                duckdb::params![stats.cohort_week, funnel, step, count],
            )?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub(crate) async fn count_cohorts_with_inner(db: &DuckDbBackend, field: &ExternalField) -> Result<i64> {
    let conn = db.conn.lock().await;
    let count: i64 = match field {
        ExternalField::Downloads => conn.query_row(
            "SELECT COUNT(*) FROM cohort_stats WHERE downloads IS NOT NULL",
            [],
            |row| row.get(0),
        )?,
        ExternalField::AdInstalls => conn.query_row(
            "SELECT COUNT(*) FROM cohort_stats WHERE ad_installs IS NOT NULL",
            [],
            |row| row.get(0),
        )?,
        ExternalField::Funnel(name) => conn.query_row(
            "SELECT COUNT(DISTINCT cohort_week) FROM cohort_funnel_steps WHERE funnel = ?1",
            duckdb::params![name],
            |row| row.get(0),
        )?,
    };
    Ok(count)
}
