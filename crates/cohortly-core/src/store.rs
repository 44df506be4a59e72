//! Store abstraction for users, event sources and the two stats tables.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::model::{
    ActionEvent, CohortStats, ExternalField, Purchase, StoreCounts, UserProfile, UserStats,
};
use crate::paging::Page;

/// Table a batch of related records is loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelatedTable {
    /// User stats rows, keyed by stats id.
    UserStats,
    /// Cohort rows, keyed by the week number rendered as a string.
    CohortStats,
}

/// Load every record of `table` whose key is in `parent_ids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedRequest {
    pub table: RelatedTable,
    pub parent_ids: Vec<String>,
}

impl RelatedRequest {
    pub fn user_stats<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: RelatedTable::UserStats,
            parent_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn cohort_stats(weeks: impl IntoIterator<Item = i64>) -> Self {
        Self {
            table: RelatedTable::CohortStats,
            parent_ids: weeks.into_iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// One lookup map per related table. Keys that were requested but not found
/// are simply absent.
#[derive(Debug, Clone, Default)]
pub struct RelatedRecords {
    pub user_stats: HashMap<String, UserStats>,
    pub cohort_stats: HashMap<i64, CohortStats>,
}

#[async_trait::async_trait]
pub trait StatsBackend: Send + Sync + 'static {
    // users

    /// Active users flagged for update or without a stats row, oldest first.
    async fn users_needing_stats(&self, limit: usize) -> Result<Vec<UserProfile>>;

    /// Points the user at `stats_id` and clears the update flag.
    async fn finish_user_stats(&self, user_id: &str, stats_id: &str) -> Result<()>;

    async fn clear_user_stats_ref(&self, user_id: &str) -> Result<()>;

    /// Blocked or deleted users that still reference a stats row.
    async fn inactive_users_with_stats(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<UserProfile>>;

    /// Any user, active or not, that references a stats row.
    async fn users_with_stats(&self, after: Option<&str>, limit: usize)
        -> Result<Page<UserProfile>>;

    /// Flags up to `limit` active users that are not yet flagged. Returns how
    /// many were flagged.
    async fn mark_clean_users_dirty(&self, limit: usize) -> Result<usize>;

    /// Attaches an empty stats row to a newly created user.
    async fn attach_empty_stats(&self, user_id: &str) -> Result<String>;

    // event sources, strictly newer than `after`, oldest first

    async fn activities_after(
        &self,
        user_id: &str,
        actions: &[&str],
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ActionEvent>>;

    async fn imported_events_after(
        &self,
        user_id: &str,
        events: &[&str],
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ActionEvent>>;

    async fn posts_after(
        &self,
        user_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<DateTime<Utc>>>;

    async fn purchases_after(
        &self,
        user_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Purchase>>;

    // stats tables

    async fn fetch_related(&self, requests: &[RelatedRequest]) -> Result<RelatedRecords>;

    async fn save_user_stats(&self, stats: &UserStats) -> Result<()>;

    async fn delete_user_stats(&self, stats_id: &str) -> Result<bool>;

    /// Deletes up to `limit` user stats rows of any user. Returns the number
    /// deleted.
    async fn delete_user_stats_batch(&self, limit: usize) -> Result<usize>;

    /// Stats rows of one cohort in user-id order.
    async fn user_stats_page(
        &self,
        cohort: i64,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<UserStats>>;

    async fn cohort_stats(&self, cohort_week: i64) -> Result<Option<CohortStats>>;

    /// Full-record upsert keyed by cohort week.
    async fn save_cohort_stats(&self, stats: &CohortStats) -> Result<()>;

    async fn list_cohort_stats(&self) -> Result<Vec<CohortStats>>;

    async fn count_cohorts_with(&self, field: &ExternalField) -> Result<i64>;

    async fn counts(&self) -> Result<StoreCounts>;

    // settings

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
