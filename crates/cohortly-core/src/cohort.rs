//! Cohort rollup over the per-user stats of one signup week.
//!
//! Retention is only measured on activated users: a user is retained in month
//! `i` when they were active in that month. Post retention starts at month one;
//! core-action retention starts at month zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::actions;
use crate::bucket::MONTH_SLOTS;
use crate::projection::{action_monthly_field, fields, StatsFields};
use crate::summary::{calc_stats, SummaryStats};

/// User-derived section of a cohort record. Replaced wholesale on every
/// aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortUserMetrics {
    pub signups: i64,
    pub acquisitions: i64,
    pub activations: i64,
    pub month0_posts_by_activated: i64,
    pub monthly_retentions: Vec<i64>,
    pub monthly_posts_by_retained: Vec<i64>,

    pub core_action_acquisitions: i64,
    pub core_action_activations: i64,
    pub monthly_core_action_retentions_incl_posts: Vec<i64>,
    pub monthly_core_actions_by_retained_incl_posts: Vec<i64>,
    pub monthly_core_action_retentions_excl_posts: Vec<i64>,
    pub monthly_core_actions_by_retained_excl_posts: Vec<i64>,
    pub monthly_posts_by_core_action_retained: Vec<i64>,
    /// action field name -> monthly totals from core-action-retained users
    pub monthly_actions_by_retained: BTreeMap<String, Vec<i64>>,
    pub monthly_total_session_seconds_by_retained: Vec<f64>,

    pub monthly_purchasers: Vec<i64>,
    pub monthly_bottles_purchased: Vec<i64>,

    pub agg_core_actions: Vec<SummaryStats>,
    pub agg_sessions: Vec<SummaryStats>,
    pub agg_session_seconds: Vec<SummaryStats>,
    pub agg_avg_core_actions_per_session: Vec<SummaryStats>,
    pub agg_avg_seconds_per_session: Vec<SummaryStats>,
}

impl Default for CohortUserMetrics {
    fn default() -> Self {
        CohortAccumulator::new().finish()
    }
}

#[derive(Debug, Clone, Default)]
struct MonthlySamples(Vec<Vec<f64>>);

impl MonthlySamples {
    fn new() -> Self {
        Self(vec![Vec::new(); MONTH_SLOTS])
    }

    fn push(&mut self, month: usize, value: f64) {
        self.0[month].push(value);
    }

    fn summarize(&self) -> Vec<SummaryStats> {
        self.0.iter().map(|s| calc_stats(s)).collect()
    }
}

/// Fold of user stats rows into [`CohortUserMetrics`]. Feed rows in a stable
/// order to keep floating sums reproducible.
#[derive(Debug, Clone)]
pub struct CohortAccumulator {
    metrics: CohortUserMetrics,
    core_actions: MonthlySamples,
    sessions: MonthlySamples,
    session_seconds: MonthlySamples,
    avg_core_actions_per_session: MonthlySamples,
    avg_seconds_per_session: MonthlySamples,
}

impl Default for CohortAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl CohortAccumulator {
    pub fn new() -> Self {
        let zeros = vec![0; MONTH_SLOTS];
        Self {
            metrics: CohortUserMetrics {
                signups: 0,
                acquisitions: 0,
                activations: 0,
                month0_posts_by_activated: 0,
                monthly_retentions: zeros.clone(),
                monthly_posts_by_retained: zeros.clone(),
                core_action_acquisitions: 0,
                core_action_activations: 0,
                monthly_core_action_retentions_incl_posts: zeros.clone(),
                monthly_core_actions_by_retained_incl_posts: zeros.clone(),
                monthly_core_action_retentions_excl_posts: zeros.clone(),
                monthly_core_actions_by_retained_excl_posts: zeros.clone(),
                monthly_posts_by_core_action_retained: zeros.clone(),
                monthly_actions_by_retained: actions::tracked_actions()
                    .map(|spec| (spec.field.to_string(), zeros.clone()))
                    .collect(),
                monthly_total_session_seconds_by_retained: vec![0.0; MONTH_SLOTS],
                monthly_purchasers: zeros.clone(),
                monthly_bottles_purchased: zeros,
                agg_core_actions: Vec::new(),
                agg_sessions: Vec::new(),
                agg_session_seconds: Vec::new(),
                agg_avg_core_actions_per_session: Vec::new(),
                agg_avg_seconds_per_session: Vec::new(),
            },
            core_actions: MonthlySamples::new(),
            sessions: MonthlySamples::new(),
            session_seconds: MonthlySamples::new(),
            avg_core_actions_per_session: MonthlySamples::new(),
            avg_seconds_per_session: MonthlySamples::new(),
        }
    }

    pub fn add(&mut self, stats: &StatsFields) {
        let m = &mut self.metrics;
        m.signups += 1;

        let posts = stats.ints(fields::MONTHLY_POST_COUNTS);
        if stats.bool(fields::ACQUIRED) {
            m.acquisitions += 1;
        }
        if stats.bool(fields::ACTIVATED) {
            m.activations += 1;
            m.month0_posts_by_activated += posts[0];
            for (i, count) in posts.iter().take(MONTH_SLOTS).enumerate() {
                if *count >= 1 {
                    if i >= 1 {
                        m.monthly_retentions[i] += 1;
                    }
                    m.monthly_posts_by_retained[i] += count;
                }
            }
        }

        if stats.bool(fields::CORE_ACTION_ACQUIRED) {
            m.core_action_acquisitions += 1;
        }
        if stats.bool(fields::CORE_ACTION_ACTIVATED) {
            m.core_action_activations += 1;
            self.add_core_action_retention(stats, &posts);
        }

        let purchases = stats.ints(fields::MONTHLY_PURCHASES);
        if purchases[0] >= 1 {
            let bottles = stats.ints(fields::MONTHLY_BOTTLES_PURCHASED);
            for i in 0..MONTH_SLOTS {
                if purchases[i] >= 1 {
                    self.metrics.monthly_purchasers[i] += 1;
                    self.metrics.monthly_bottles_purchased[i] += bottles[i];
                }
            }
        }
    }

    fn add_core_action_retention(&mut self, stats: &StatsFields, posts: &[i64]) {
        let incl = stats.ints(fields::MONTHLY_CORE_ACTIONS_INCL_POSTS);
        let excl = stats.ints(fields::MONTHLY_CORE_ACTIONS_EXCL_POSTS);
        let sessions = stats.ints(fields::MONTHLY_SESSION_COUNT);
        let seconds = stats.floats(fields::MONTHLY_TOTAL_SESSION_SECONDS);
        let avg_actions = stats.floats(fields::MONTHLY_AVERAGE_CORE_ACTIONS_PER_SESSION);
        let avg_seconds = stats.floats(fields::MONTHLY_AVERAGE_SECONDS_PER_SESSION);
        let per_action: Vec<(String, Vec<i64>)> = actions::tracked_actions()
            .map(|spec| (spec.field.to_string(), stats.ints(&action_monthly_field(spec.field))))
            .collect();

        let m = &mut self.metrics;
        for i in 0..MONTH_SLOTS {
            if excl[i] >= 1 {
                m.monthly_core_action_retentions_excl_posts[i] += 1;
                m.monthly_core_actions_by_retained_excl_posts[i] += excl[i];
            }
            if incl[i] < 1 {
                continue;
            }
            m.monthly_core_action_retentions_incl_posts[i] += 1;
            m.monthly_core_actions_by_retained_incl_posts[i] += incl[i];
            m.monthly_posts_by_core_action_retained[i] += posts[i];
            m.monthly_total_session_seconds_by_retained[i] += seconds[i];
            for (field, counts) in &per_action {
                if let Some(totals) = m.monthly_actions_by_retained.get_mut(field) {
                    totals[i] += counts[i];
                }
            }

            if sessions[i] >= 1 {
                self.core_actions.push(i, incl[i] as f64);
                self.sessions.push(i, sessions[i] as f64);
                self.session_seconds.push(i, seconds[i]);
                self.avg_core_actions_per_session.push(i, avg_actions[i]);
                self.avg_seconds_per_session.push(i, avg_seconds[i]);
            }
        }
    }

    pub fn finish(self) -> CohortUserMetrics {
        let mut metrics = self.metrics;
        metrics.agg_core_actions = self.core_actions.summarize();
        metrics.agg_sessions = self.sessions.summarize();
        metrics.agg_session_seconds = self.session_seconds.summarize();
        metrics.agg_avg_core_actions_per_session = self.avg_core_actions_per_session.summarize();
        metrics.agg_avg_seconds_per_session = self.avg_seconds_per_session.summarize();
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::FieldValue;

    fn monthly(values: &[(usize, i64)]) -> FieldValue {
        let mut slots = vec![0; MONTH_SLOTS];
        for (i, v) in values {
            slots[*i] = *v;
        }
        FieldValue::Ints(slots)
    }

    fn row(entries: Vec<(&str, FieldValue)>) -> StatsFields {
        StatsFields(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn empty_cohort_is_all_zero() {
        let m = CohortAccumulator::new().finish();
        assert_eq!(m.signups, 0);
        assert_eq!(m.monthly_retentions, vec![0; MONTH_SLOTS]);
        assert_eq!(m.agg_core_actions.len(), MONTH_SLOTS);
        assert!(m.agg_sessions.iter().all(|s| *s == SummaryStats::default()));
    }

    #[test]
    fn post_retention_skips_month_zero() {
        let mut acc = CohortAccumulator::new();
        acc.add(&row(vec![
            (fields::ACQUIRED, FieldValue::Bool(true)),
            (fields::ACTIVATED, FieldValue::Bool(true)),
            (fields::MONTHLY_POST_COUNTS, monthly(&[(0, 2), (2, 5)])),
        ]));
        acc.add(&row(vec![
            (fields::ACQUIRED, FieldValue::Bool(true)),
            (fields::MONTHLY_POST_COUNTS, monthly(&[(0, 1), (1, 9)])),
        ]));
        acc.add(&row(vec![]));
        let m = acc.finish();

        assert_eq!(m.signups, 3);
        assert_eq!(m.acquisitions, 2);
        assert_eq!(m.activations, 1);
        assert_eq!(m.month0_posts_by_activated, 2);
        assert_eq!(m.monthly_retentions[0], 0);
        assert_eq!(m.monthly_retentions[1], 0);
        assert_eq!(m.monthly_retentions[2], 1);
        assert_eq!(m.monthly_posts_by_retained[0], 2);
        assert_eq!(m.monthly_posts_by_retained[2], 5);
    }

    #[test]
    fn core_action_rollups_sample_retained_months_with_sessions() {
        let mut acc = CohortAccumulator::new();
        acc.add(&row(vec![
            (fields::CORE_ACTION_ACQUIRED, FieldValue::Bool(true)),
            (fields::CORE_ACTION_ACTIVATED, FieldValue::Bool(true)),
            (fields::MONTHLY_CORE_ACTIONS_INCL_POSTS, monthly(&[(0, 6), (1, 3)])),
            (fields::MONTHLY_CORE_ACTIONS_EXCL_POSTS, monthly(&[(0, 4)])),
            (fields::MONTHLY_POST_COUNTS, monthly(&[(0, 2), (1, 3)])),
            (fields::MONTHLY_SESSION_COUNT, monthly(&[(0, 2)])),
            ("monthly_comment_count", monthly(&[(0, 4)])),
            (fields::MONTHLY_TOTAL_SESSION_SECONDS, FieldValue::Floats(vec![120.0, 30.0])),
            (fields::MONTHLY_AVERAGE_SECONDS_PER_SESSION, FieldValue::Floats(vec![60.0])),
            (fields::MONTHLY_AVERAGE_CORE_ACTIONS_PER_SESSION, FieldValue::Floats(vec![3.0])),
        ]));
        acc.add(&row(vec![
            (fields::CORE_ACTION_ACQUIRED, FieldValue::Bool(true)),
            (fields::CORE_ACTION_ACTIVATED, FieldValue::Bool(true)),
            (fields::MONTHLY_CORE_ACTIONS_INCL_POSTS, monthly(&[(0, 2)])),
            (fields::MONTHLY_SESSION_COUNT, monthly(&[(0, 1)])),
            (fields::MONTHLY_TOTAL_SESSION_SECONDS, FieldValue::Floats(vec![40.0])),
            (fields::MONTHLY_AVERAGE_SECONDS_PER_SESSION, FieldValue::Floats(vec![40.0])),
            (fields::MONTHLY_AVERAGE_CORE_ACTIONS_PER_SESSION, FieldValue::Floats(vec![2.0])),
        ]));
        let m = acc.finish();

        assert_eq!(m.core_action_activations, 2);
        assert_eq!(m.monthly_core_action_retentions_incl_posts[0], 2);
        assert_eq!(m.monthly_core_action_retentions_incl_posts[1], 1);
        assert_eq!(m.monthly_core_actions_by_retained_incl_posts[0], 8);
        assert_eq!(m.monthly_core_action_retentions_excl_posts[0], 1);
        assert_eq!(m.monthly_posts_by_core_action_retained[1], 3);
        assert_eq!(m.monthly_actions_by_retained["comment"][0], 4);
        assert_eq!(m.monthly_actions_by_retained["session"][0], 3);
        assert_eq!(m.monthly_total_session_seconds_by_retained[0], 160.0);
        assert_eq!(m.monthly_total_session_seconds_by_retained[1], 30.0);

        let seconds = m.agg_avg_seconds_per_session[0];
        assert_eq!(seconds.count, 2);
        assert_eq!(seconds.mean, 50.0);
        // month one is retained but has no sessions
        assert_eq!(m.agg_core_actions[1].count, 0);
        assert_eq!(m.agg_core_actions[0].sum, 8.0);
    }

    #[test]
    fn purchases_only_count_month_zero_buyers() {
        let mut acc = CohortAccumulator::new();
        acc.add(&row(vec![
            (fields::MONTHLY_PURCHASES, monthly(&[(0, 1), (3, 2)])),
            (fields::MONTHLY_BOTTLES_PURCHASED, monthly(&[(0, 6), (3, 12)])),
        ]));
        acc.add(&row(vec![
            (fields::MONTHLY_PURCHASES, monthly(&[(1, 1)])),
            (fields::MONTHLY_BOTTLES_PURCHASED, monthly(&[(1, 3)])),
        ]));
        let m = acc.finish();
        assert_eq!(m.monthly_purchasers[0], 1);
        assert_eq!(m.monthly_purchasers[1], 0);
        assert_eq!(m.monthly_purchasers[3], 1);
        assert_eq!(m.monthly_bottles_purchased[3], 12);
    }

    #[test]
    fn same_rows_give_same_metrics() {
        let rows = vec![
            row(vec![
                (fields::ACTIVATED, FieldValue::Bool(true)),
                (fields::MONTHLY_POST_COUNTS, monthly(&[(0, 2), (1, 1)])),
            ]),
            row(vec![(fields::ACQUIRED, FieldValue::Bool(true))]),
        ];
        let run = || {
            let mut acc = CohortAccumulator::new();
            rows.iter().for_each(|r| acc.add(r));
            acc.finish()
        };
        assert_eq!(run(), run());
    }
}
