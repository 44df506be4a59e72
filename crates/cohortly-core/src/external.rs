//! Third-party report APIs merged into the cohort table.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// A saved conversion funnel and the names of its steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunnelSpec {
    pub name: &'static str,
    pub funnel_id: u64,
    pub steps: &'static [&'static str],
}

pub const FUNNELS: &[FunnelSpec] = &[
    FunnelSpec {
        name: "bwb_basic",
        funnel_id: 758_661,
        steps: &["signups", "buy_wine_begins"],
    },
    FunnelSpec {
        name: "bwb_detailed",
        funnel_id: 758_889,
        steps: &["signups", "buy_wine_begins", "quantity_selected", "complete"],
    },
    FunnelSpec {
        name: "referrer",
        funnel_id: 771_147,
        steps: &["signups", "invite_friends_complete"],
    },
];

#[async_trait]
pub trait FunnelApi: Send + Sync {
    /// Step counts, in step order, for users entering the funnel between
    /// `from` and `to` inclusive.
    async fn step_counts(&self, funnel_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<i64>>;
}

#[async_trait]
pub trait DownloadReportApi: Send + Sync {
    /// Daily download counts from `start` up to today.
    async fn daily_downloads(&self, start: NaiveDate) -> Result<Vec<(NaiveDate, i64)>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdReportRow {
    pub date_start: NaiveDate,
    pub date_stop: NaiveDate,
    pub spend: f64,
    pub installs: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdReportPage {
    pub rows: Vec<AdReportRow>,
    /// Opaque continuation handed back to [`AdReportApi::report_page`].
    pub next: Option<String>,
}

/// Asynchronous ad-spend report: submit, poll, then page through results.
#[async_trait]
pub trait AdReportApi: Send + Sync {
    /// Starts a report over `[start, stop)`. Returns the job id.
    async fn submit_report(&self, token: &str, start: NaiveDate, stop: NaiveDate) -> Result<String>;

    async fn is_complete(&self, token: &str, job_id: &str) -> Result<bool>;

    async fn report_page(
        &self,
        token: &str,
        job_id: &str,
        next: Option<&str>,
    ) -> Result<AdReportPage>;
}

#[async_trait]
pub trait PeopleSink: Send + Sync {
    async fn set_properties(&self, distinct_id: &str, properties: serde_json::Value) -> Result<()>;
}
