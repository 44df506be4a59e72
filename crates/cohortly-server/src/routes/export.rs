use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::Response,
};

use cohortly_core::cohort::CohortUserMetrics;
use cohortly_core::dates;
use cohortly_core::external::FUNNELS;
use cohortly_core::model::CohortStats;
use cohortly_core::store::StatsBackend;
use cohortly_core::summary::SummaryStats;

use crate::{error::AppError, state::AppState};

/// Last month offset written as its own column.
pub const LAST_EXPORTED_MONTH: usize = 12;

type CellFn = Box<dyn Fn(&CohortStats) -> String + Send + Sync>;

/// One CSV column: header plus cell extractor.
pub struct CohortColumn {
    pub header: String,
    cell: CellFn,
}

impl CohortColumn {
    fn new(header: impl Into<String>, cell: impl Fn(&CohortStats) -> String + Send + Sync + 'static) -> Self {
        Self {
            header: header.into(),
            cell: Box::new(cell),
        }
    }

    fn user(header: impl Into<String>, value: fn(&CohortUserMetrics) -> i64) -> Self {
        Self::new(header, move |c| c.user.as_ref().map_or(0, value).to_string())
    }

    pub fn cell(&self, cohort: &CohortStats) -> String {
        (self.cell)(cohort)
    }
}

fn month_of(values: &[i64], month: usize) -> i64 {
    values.get(month).copied().unwrap_or(0)
}

fn summary_of(values: &[SummaryStats], month: usize, pick: fn(&SummaryStats) -> f64) -> f64 {
    values.get(month).map_or(0.0, pick)
}

/// One column per month in `first..=LAST_EXPORTED_MONTH`. `label` holds an
/// `X` replaced by the month number.
fn monthly_ints(
    columns: &mut Vec<CohortColumn>,
    label: &str,
    first: usize,
    values: fn(&CohortUserMetrics) -> &Vec<i64>,
) {
    for month in first..=LAST_EXPORTED_MONTH {
        columns.push(CohortColumn::new(label.replace('X', &month.to_string()), move |c| {
            c.user
                .as_ref()
                .map_or(0, |u| month_of(values(u), month))
                .to_string()
        }));
    }
}

fn monthly_summaries(
    columns: &mut Vec<CohortColumn>,
    label: &str,
    values: fn(&CohortUserMetrics) -> &Vec<SummaryStats>,
    pick: fn(&SummaryStats) -> f64,
) {
    for month in 0..=LAST_EXPORTED_MONTH {
        columns.push(CohortColumn::new(label.replace('X', &month.to_string()), move |c| {
            c.user
                .as_ref()
                .map_or(0.0, |u| summary_of(values(u), month, pick))
                .to_string()
        }));
    }
}

/// The cohort export layout, in column order.
pub fn cohort_columns() -> Vec<CohortColumn> {
    let mut columns = vec![
        CohortColumn::new("Cohort date", |c| dates::format_day(c.cohort_date)),
        CohortColumn::new("Cohort week", |c| c.cohort_week.to_string()),
        CohortColumn::new("App downloads", |c| c.external.downloads.unwrap_or(0).to_string()),
        CohortColumn::user("Signups", |u| u.signups),
        CohortColumn::user("Acquisitions", |u| u.acquisitions),
        CohortColumn::user("Activations", |u| u.activations),
        CohortColumn::user("Month 0 posts by activated", |u| u.month0_posts_by_activated),
    ];

    for funnel in FUNNELS {
        for step in funnel.steps {
            columns.push(CohortColumn::new(
                format!("Funnel {} {}", funnel.name, step),
                move |c| {
                    c.external
                        .funnels
                        .get(funnel.name)
                        .and_then(|steps| steps.get(*step))
                        .copied()
                        .unwrap_or(0)
                        .to_string()
                },
            ));
        }
    }

    columns.push(CohortColumn::new("Ad installs", |c| {
        c.external.ad_installs.unwrap_or(0).to_string()
    }));
    columns.push(CohortColumn::new("Ad spend (USD)", |c| {
        c.external.ad_spend.unwrap_or(0.0).to_string()
    }));

    monthly_ints(&mut columns, "Month X retentions", 1, |u| &u.monthly_retentions);
    monthly_ints(&mut columns, "Month X posts by retained", 0, |u| &u.monthly_posts_by_retained);
    monthly_ints(&mut columns, "Month X purchasers", 0, |u| &u.monthly_purchasers);
    monthly_ints(&mut columns, "Month X bottles", 0, |u| &u.monthly_bottles_purchased);

    columns.push(CohortColumn::user("Core action acquisitions", |u| u.core_action_acquisitions));
    columns.push(CohortColumn::user("Core action activations", |u| u.core_action_activations));
    monthly_ints(&mut columns, "Month X core action retentions", 1, |u| {
        &u.monthly_core_action_retentions_incl_posts
    });
    monthly_ints(&mut columns, "Month X core actions by retained", 0, |u| {
        &u.monthly_core_actions_by_retained_incl_posts
    });

    let sum = |s: &SummaryStats| s.sum;
    let median = |s: &SummaryStats| s.median;
    monthly_summaries(&mut columns, "Month X total session seconds", |u| &u.agg_session_seconds, sum);
    monthly_summaries(&mut columns, "Month X total sessions", |u| &u.agg_sessions, sum);
    monthly_summaries(
        &mut columns,
        "Month X totalled average seconds per session",
        |u| &u.agg_avg_seconds_per_session,
        sum,
    );
    monthly_summaries(
        &mut columns,
        "Month X totalled average core actions per session",
        |u| &u.agg_avg_core_actions_per_session,
        sum,
    );
    monthly_summaries(
        &mut columns,
        "Month X median core actions per user",
        |u| &u.agg_core_actions,
        median,
    );
    columns
}

pub fn build_csv(cohorts: &[CohortStats]) -> anyhow::Result<Vec<u8>> {
    let columns = cohort_columns();
    let mut wtr = csv::Writer::from_writer(Vec::with_capacity(cohorts.len().saturating_mul(1024)));

    wtr.write_record(columns.iter().map(|c| c.header.as_str()))
        .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;
    for cohort in cohorts {
        wtr.write_record(columns.iter().map(|c| c.cell(cohort)))
            .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;
    }

    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("csv flush failed: {e}"))
}

/// `GET /api/cohorts.csv`: the cohort table as CSV, one row per week.
#[tracing::instrument(skip(state))]
pub async fn export_cohorts(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let mut cohorts = state.db.list_cohort_stats().await.map_err(AppError::Internal)?;
    cohorts.sort_by_key(|c| c.cohort_week);
    let csv_bytes = Bytes::from(build_csv(&cohorts).map_err(AppError::Internal)?);
    build_csv_response("cohorts.csv", csv_bytes)
}

fn build_csv_response(filename: &str, csv_bytes: Bytes) -> Result<Response, AppError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(axum::body::Body::from(csv_bytes))
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))
}
