//! Mergers that copy third-party metrics into the cohort table.
//!
//! Each merger owns one section of a [`CohortStats`] record and overwrites it
//! in place. They run one after another, never concurrently with each other or
//! with the aggregator.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use cohortly_core::external::{AdReportApi, DownloadReportApi, FunnelApi, PeopleSink};
use cohortly_core::model::CohortStats;
use cohortly_core::store::StatsBackend;

use crate::config::Config;

pub mod ads;
pub mod clients;
pub mod downloads;
pub mod funnels;

/// The configured third-party clients. `None` means the API is not set up
/// and its merger is skipped.
#[derive(Clone, Default)]
pub struct ExternalApis {
    pub funnels: Option<Arc<dyn FunnelApi>>,
    pub downloads: Option<Arc<dyn DownloadReportApi>>,
    pub ads: Option<Arc<dyn AdReportApi>>,
    pub people: Option<Arc<dyn PeopleSink>>,
}

impl ExternalApis {
    /// Build HTTP clients for every API that has credentials in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = clients::http_client(config)?;
        let apis = Self {
            funnels: config.funnels.clone().map(|c| {
                Arc::new(clients::HttpFunnelApi::new(client.clone(), c)) as Arc<dyn FunnelApi>
            }),
            downloads: config.downloads.clone().map(|c| {
                Arc::new(clients::HttpDownloadReportApi::new(client.clone(), c))
                    as Arc<dyn DownloadReportApi>
            }),
            ads: config.ads.clone().map(|c| {
                Arc::new(clients::HttpAdReportApi::new(client.clone(), c)) as Arc<dyn AdReportApi>
            }),
            people: config.people.clone().map(|c| {
                Arc::new(clients::HttpPeopleSink::new(client.clone(), c)) as Arc<dyn PeopleSink>
            }),
        };
        info!(
            funnels = apis.funnels.is_some(),
            downloads = apis.downloads.is_some(),
            ads = apis.ads.is_some(),
            people = apis.people.is_some(),
            "External APIs configured"
        );
        Ok(apis)
    }
}

/// Read the cohort record for `week`, or start a fresh one.
pub(crate) async fn load_cohort(store: &dyn StatsBackend, week: i64) -> Result<CohortStats> {
    Ok(store
        .cohort_stats(week)
        .await?
        .unwrap_or_else(|| CohortStats::new(week)))
}
