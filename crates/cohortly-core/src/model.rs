use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointSet;
use crate::cohort::CohortUserMetrics;
use crate::projection::StatsFields;

/// Profile attributes of a user as read from the user store. Blocked and
/// deleted users never reach the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub date_of_birth: Option<NaiveDate>,
    pub facebook_id: Option<String>,
    /// Distinct id in the people-analytics sink.
    pub people_id: Option<String>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    pub last_notification_at: Option<DateTime<Utc>>,
    pub signup_source: Option<String>,
    pub stats_id: Option<String>,
    pub stats_need_update: bool,
}

/// Row from the activity log or the imported event table.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEvent {
    pub action: String,
    pub at: DateTime<Utc>,
    pub session_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub created_at: DateTime<Utc>,
    pub status: Option<String>,
    pub quantity: i64,
}

/// Purchases created before this day only count once completed.
pub fn purchase_status_cutover() -> NaiveDate {
    NaiveDate::from_ymd_opt(2013, 9, 16).unwrap_or(NaiveDate::MIN)
}

impl Purchase {
    pub fn counts_toward_stats(&self) -> bool {
        self.created_at.date_naive() >= purchase_status_cutover()
            || self.status.as_deref() == Some("completed")
    }
}

/// Per-user stats record: projected fields plus the checkpoint they were
/// computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub id: String,
    pub user_id: String,
    pub cohort: i64,
    pub fields: StatsFields,
    pub checkpoint: CheckpointSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalMetrics {
    pub downloads: Option<i64>,
    pub ad_installs: Option<i64>,
    pub ad_spend: Option<f64>,
    /// funnel name -> step name -> count
    pub funnels: BTreeMap<String, BTreeMap<String, i64>>,
}

/// One row of the cohort table. The aggregator owns `user`; each external
/// merger owns its own part of `external`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortStats {
    pub cohort_week: i64,
    pub cohort_date: NaiveDate,
    pub user: Option<CohortUserMetrics>,
    pub external: ExternalMetrics,
}

impl CohortStats {
    pub fn new(cohort_week: i64) -> Self {
        Self {
            cohort_week,
            cohort_date: crate::dates::cohort_date(cohort_week),
            user: None,
            external: ExternalMetrics::default(),
        }
    }
}

/// Cohort-table columns written by the external mergers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalField {
    Downloads,
    AdInstalls,
    Funnel(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub users: i64,
    pub users_needing_update: i64,
    pub user_stats: i64,
    pub cohorts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn purchase(y: i32, m: u32, d: u32, status: Option<&str>) -> Purchase {
        Purchase {
            created_at: Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap(),
            status: status.map(str::to_string),
            quantity: 1,
        }
    }

    #[test]
    fn purchases_before_cutover_need_completed_status() {
        assert!(!purchase(2013, 9, 15, None).counts_toward_stats());
        assert!(!purchase(2013, 9, 15, Some("pending")).counts_toward_stats());
        assert!(purchase(2013, 9, 15, Some("completed")).counts_toward_stats());
    }

    #[test]
    fn purchases_from_cutover_always_count() {
        assert!(purchase(2013, 9, 16, None).counts_toward_stats());
        assert!(purchase(2014, 2, 1, Some("cancelled")).counts_toward_stats());
    }

    #[test]
    fn new_cohort_record_is_dated_by_week_end() {
        let stats = CohortStats::new(2);
        assert_eq!(stats.cohort_date, NaiveDate::from_ymd_opt(2013, 6, 23).unwrap());
        assert!(stats.user.is_none());
    }
}
