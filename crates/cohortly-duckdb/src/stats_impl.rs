use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cohortly_core::model::{
    ActionEvent, CohortStats, ExternalField, Purchase, StoreCounts, UserProfile, UserStats,
};
use cohortly_core::paging::Page;
use cohortly_core::store::{RelatedRecords, RelatedRequest, RelatedTable, StatsBackend};

use crate::{cohort_stats, sources, user_stats, users, DuckDbBackend};

#[async_trait]
impl StatsBackend for DuckDbBackend {
    async fn users_needing_stats(&self, limit: usize) -> anyhow::Result<Vec<UserProfile>> {
        users::users_needing_stats_inner(self, limit).await
    }

    async fn finish_user_stats(&self, user_id: &str, stats_id: &str) -> anyhow::Result<()> {
        users::finish_user_stats_inner(self, user_id, stats_id).await
    }

    async fn clear_user_stats_ref(&self, user_id: &str) -> anyhow::Result<()> {
        users::clear_user_stats_ref_inner(self, user_id).await
    }

    async fn inactive_users_with_stats(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Page<UserProfile>> {
        users::users_with_stats_inner(self, true, after, limit).await
    }

    async fn users_with_stats(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Page<UserProfile>> {
        users::users_with_stats_inner(self, false, after, limit).await
    }

    async fn mark_clean_users_dirty(&self, limit: usize) -> anyhow::Result<usize> {
        users::mark_clean_users_dirty_inner(self, limit).await
    }

    async fn attach_empty_stats(&self, user_id: &str) -> anyhow::Result<String> {
        users::attach_empty_stats_inner(self, user_id).await
    }

    async fn activities_after(
        &self,
        user_id: &str,
        actions: &[&str],
        after: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<ActionEvent>> {
        sources::activities_after_inner(self, user_id, actions, after).await
    }

    async fn imported_events_after(
        &self,
        user_id: &str,
        events: &[&str],
        after: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<ActionEvent>> {
        sources::imported_events_after_inner(self, user_id, events, after).await
    }

    async fn posts_after(
        &self,
        user_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<DateTime<Utc>>> {
        sources::posts_after_inner(self, user_id, after).await
    }

    async fn purchases_after(
        &self,
        user_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Purchase>> {
        sources::purchases_after_inner(self, user_id, after).await
    }

    async fn fetch_related(&self, requests: &[RelatedRequest]) -> anyhow::Result<RelatedRecords> {
        let mut related = RelatedRecords::default();
        for request in requests {
            match request.table {
                RelatedTable::UserStats => {
                    for stats in user_stats::user_stats_by_ids(self, &request.parent_ids).await? {
                        related.user_stats.insert(stats.id.clone(), stats);
                    }
                }
                RelatedTable::CohortStats => {
                    let weeks: Vec<i64> = request
                        .parent_ids
                        .iter()
                        .filter_map(|id| id.parse().ok())
                        .collect();
                    for stats in cohort_stats::load_cohorts(self, Some(&weeks)).await? {
                        related.cohort_stats.insert(stats.cohort_week, stats);
                    }
                }
            }
        }
        Ok(related)
    }

    async fn save_user_stats(&self, stats: &UserStats) -> anyhow::Result<()> {
        user_stats::save_user_stats_inner(self, stats).await
    }

    async fn delete_user_stats(&self, stats_id: &str) -> anyhow::Result<bool> {
        user_stats::delete_user_stats_inner(self, stats_id).await
    }

    async fn delete_user_stats_batch(&self, limit: usize) -> anyhow::Result<usize> {
        user_stats::delete_user_stats_batch_inner(self, limit).await
    }

    async fn user_stats_page(
        &self,
        cohort: i64,
        after: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Page<UserStats>> {
        user_stats::user_stats_page_inner(self, cohort, after, limit).await
    }

    async fn cohort_stats(&self, cohort_week: i64) -> anyhow::Result<Option<CohortStats>> {
        cohort_stats::cohort_stats_inner(self, cohort_week).await
    }

    async fn save_cohort_stats(&self, stats: &CohortStats) -> anyhow::Result<()> {
        cohort_stats::save_cohort_stats_inner(self, stats).await
    }

    async fn list_cohort_stats(&self) -> anyhow::Result<Vec<CohortStats>> {
        cohort_stats::load_cohorts(self, None).await
    }

    async fn count_cohorts_with(&self, field: &ExternalField) -> anyhow::Result<i64> {
        cohort_stats::count_cohorts_with_inner(self, field).await
    }

    async fn counts(&self) -> anyhow::Result<StoreCounts> {
        users::counts_inner(self).await
    }

    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<String>> {
        DuckDbBackend::get_setting(self, key).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()> {
        DuckDbBackend::set_setting(self, key, value).await
    }
}
