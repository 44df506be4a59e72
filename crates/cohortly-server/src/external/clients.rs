use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{Datelike, NaiveDate};
use reqwest::Client;
use serde_json::{json, Value};

use cohortly_core::config::{
    AdApiConfig, Config, DownloadApiConfig, FunnelApiConfig, PeopleSinkConfig,
};
use cohortly_core::dates;
use cohortly_core::external::{
    AdReportApi, AdReportPage, AdReportRow, DownloadReportApi, FunnelApi, PeopleSink,
};

/// Conversion window, in days, requested for every funnel query.
const FUNNEL_LENGTH_DAYS: u32 = 30;

/// Ad-network action type counted as an install.
const INSTALL_ACTION: &str = "mobile_app_install";

const JOB_COMPLETED: &str = "Job Completed";

pub fn http_client(config: &Config) -> Result<Client> {
    Client::builder()
        .connect_timeout(std::time::Duration::from_secs(5))
        .timeout(config.http_timeout())
        .build()
        .context("HTTP client build failed")
}

async fn read_json(resp: reqwest::Response, what: &str) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{what} error {status}: {body}");
    }
    resp.json()
        .await
        .with_context(|| format!("{what} response parse failed"))
}

fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid date {raw:?}"))
}

/// Numbers arrive as JSON numbers or numeric strings depending on the API.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Funnel query client (HTTP basic auth with the API secret).
#[derive(Clone)]
pub struct HttpFunnelApi {
    client: Client,
    config: FunnelApiConfig,
}

impl HttpFunnelApi {
    pub fn new(client: Client, config: FunnelApiConfig) -> Self {
        Self { client, config }
    }
}

/// Step counts for the first date bucket of a funnel response.
pub fn parse_funnel_steps(body: &Value) -> Result<Vec<i64>> {
    let date = body
        .pointer("/meta/dates/0")
        .and_then(Value::as_str)
        .context("funnel response has no dates")?;
    let steps = body
        .get("data")
        .and_then(|d| d.get(date))
        .and_then(|d| d.get("steps"))
        .and_then(Value::as_array)
        .with_context(|| format!("funnel response has no steps for {date}"))?;
    Ok(steps
        .iter()
        .map(|step| step.get("count").and_then(number).unwrap_or(0.0) as i64)
        .collect())
}

#[async_trait]
impl FunnelApi for HttpFunnelApi {
    async fn step_counts(&self, funnel_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<i64>> {
        let url = format!("{}/funnels/", self.config.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(url)
            .basic_auth(&self.config.api_secret, Some(""))
            .query(&[
                ("funnel_id", funnel_id.to_string()),
                ("from_date", dates::format_day(from)),
                ("to_date", dates::format_day(to)),
                ("length", FUNNEL_LENGTH_DAYS.to_string()),
                ("unit", "week".to_string()),
                ("api_key", self.config.api_key.clone()),
            ])
            .send()
            .await
            .context("funnel request failed")?;
        parse_funnel_steps(&read_json(resp, "funnel").await?)
    }
}

/// App-store sales report client.
#[derive(Clone)]
pub struct HttpDownloadReportApi {
    client: Client,
    config: DownloadApiConfig,
}

impl HttpDownloadReportApi {
    pub fn new(client: Client, config: DownloadApiConfig) -> Self {
        Self { client, config }
    }
}

pub fn parse_sales_list(body: &Value) -> Result<Vec<(NaiveDate, i64)>> {
    let list = body
        .get("sales_list")
        .and_then(Value::as_array)
        .context("sales report has no sales_list")?;
    list.iter()
        .map(|entry| {
            let day = entry
                .get("date")
                .and_then(Value::as_str)
                .context("sales entry has no date")?;
            let downloads = entry
                .pointer("/units/app/downloads")
                .and_then(number)
                .unwrap_or(0.0) as i64;
            Ok((parse_day(day)?, downloads))
        })
        .collect()
}

#[async_trait]
impl DownloadReportApi for HttpDownloadReportApi {
    async fn daily_downloads(&self, start: NaiveDate) -> Result<Vec<(NaiveDate, i64)>> {
        let url = format!(
            "{}/accounts/{}/apps/{}/sales",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_id,
            self.config.app_id
        );
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.config.token)
            .query(&[
                ("break_down", "date".to_string()),
                ("start_date", dates::format_day(start)),
            ])
            .send()
            .await
            .context("sales report request failed")?;
        parse_sales_list(&read_json(resp, "sales report").await?)
    }
}

/// Ad-network insights client. Reports run as asynchronous jobs.
#[derive(Clone)]
pub struct HttpAdReportApi {
    client: Client,
    config: AdApiConfig,
}

impl HttpAdReportApi {
    pub fn new(client: Client, config: AdApiConfig) -> Self {
        Self { client, config }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }
}

fn ymd(date: NaiveDate) -> Value {
    json!({ "year": date.year(), "month": date.month(), "day": date.day() })
}

pub fn parse_ad_rows(body: &Value) -> Result<AdReportPage> {
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .context("ad report page has no data")?;
    let rows = data
        .iter()
        .map(|row| {
            let date_start = parse_day(
                row.get("date_start")
                    .and_then(Value::as_str)
                    .context("ad row has no date_start")?,
            )?;
            let date_stop = parse_day(
                row.get("date_stop")
                    .and_then(Value::as_str)
                    .context("ad row has no date_stop")?,
            )?;
            let installs = row
                .get("actions")
                .and_then(Value::as_array)
                .map(|actions| {
                    actions
                        .iter()
                        .filter(|a| a.get("action_type").and_then(Value::as_str) == Some(INSTALL_ACTION))
                        .filter_map(|a| a.get("value").and_then(number))
                        .sum::<f64>() as i64
                })
                .unwrap_or(0);
            Ok(AdReportRow {
                date_start,
                date_stop,
                spend: row.get("spend").and_then(number).unwrap_or(0.0),
                installs,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let next = body
        .pointer("/paging/next")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(AdReportPage { rows, next })
}

#[async_trait]
impl AdReportApi for HttpAdReportApi {
    async fn submit_report(&self, token: &str, start: NaiveDate, stop: NaiveDate) -> Result<String> {
        let url = format!("{}/act_{}/reportstats", self.base(), self.config.account_id);
        let interval = json!({ "day_start": ymd(start), "day_stop": ymd(stop) });
        let resp = self
            .client
            .post(url)
            .query(&[
                ("access_token", token.to_string()),
                ("time_interval", interval.to_string()),
                ("data_columns", "['actions','spend','adgroup_id']".to_string()),
                ("actions_group_by", "['action_type']".to_string()),
                ("async", "true".to_string()),
            ])
            .send()
            .await
            .context("ad report submit failed")?;
        match read_json(resp, "ad report submit").await? {
            Value::String(id) => Ok(id),
            Value::Number(id) => Ok(id.to_string()),
            other => anyhow::bail!("unexpected ad report job id: {other}"),
        }
    }

    async fn is_complete(&self, token: &str, job_id: &str) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/{job_id}", self.base()))
            .query(&[("access_token", token)])
            .send()
            .await
            .context("ad report poll failed")?;
        let body = read_json(resp, "ad report poll").await?;
        Ok(body.get("async_status").and_then(Value::as_str) == Some(JOB_COMPLETED))
    }

    async fn report_page(
        &self,
        token: &str,
        job_id: &str,
        next: Option<&str>,
    ) -> Result<AdReportPage> {
        let request = match next {
            Some(url) => self.client.get(url).query(&[("access_token", token)]),
            None => self
                .client
                .get(format!("{}/act_{}/reportstats", self.base(), self.config.account_id))
                .query(&[("report_run_id", job_id), ("access_token", token)]),
        };
        let resp = request.send().await.context("ad report page failed")?;
        parse_ad_rows(&read_json(resp, "ad report page").await?)
    }
}

/// People-analytics profile sink. The update is a base64 JSON `data`
/// parameter.
#[derive(Clone)]
pub struct HttpPeopleSink {
    client: Client,
    config: PeopleSinkConfig,
}

impl HttpPeopleSink {
    pub fn new(client: Client, config: PeopleSinkConfig) -> Self {
        Self { client, config }
    }

    pub fn encode_update(&self, distinct_id: &str, properties: Value) -> String {
        let payload = json!({
            "$token": self.config.token,
            "$distinct_id": distinct_id,
            "$set": properties,
        });
        base64::engine::general_purpose::STANDARD.encode(payload.to_string())
    }
}

#[async_trait]
impl PeopleSink for HttpPeopleSink {
    async fn set_properties(&self, distinct_id: &str, properties: Value) -> Result<()> {
        let data = self.encode_update(distinct_id, properties);
        let resp = self
            .client
            .get(&self.config.url)
            .query(&[("data", data)])
            .send()
            .await
            .context("people update failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("people update error {status}: {body}");
        }
        Ok(())
    }
}
