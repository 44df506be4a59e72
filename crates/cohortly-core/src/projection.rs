//! Flat per-user stats record.
//!
//! The record is produced by walking [`projection_table`], a fixed list of
//! `(field name, extractor)` pairs evaluated against the user profile and its
//! checkpointed buckets.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actions::{self, SESSION};
use crate::bucket::{EventBucket, MONTH_SLOTS};
use crate::checkpoint::CheckpointSet;
use crate::dates;
use crate::model::UserProfile;

pub mod fields {
    pub const COHORT: &str = "cohort";
    pub const USER_ID: &str = "user_id";
    pub const PEOPLE_ID: &str = "people_id";
    pub const USERNAME: &str = "username";
    pub const EMAIL: &str = "email";
    pub const SIGNUP: &str = "signup";
    pub const SIGNUP_DAY: &str = "signup_day";
    pub const SIGNUP_WEEK: &str = "signup_week";
    pub const SIGNUP_SOURCE: &str = "signup_source";
    pub const EMAIL_IS_VERIFIED: &str = "email_is_verified";
    pub const DATE_OF_BIRTH: &str = "date_of_birth";
    pub const FACEBOOK_ID: &str = "facebook_id";
    pub const FOLLOWER_COUNT: &str = "follower_count";
    pub const FOLLOWING_COUNT: &str = "following_count";
    pub const LAST_NOTIFICATION_DATE: &str = "last_notification_date";

    pub const FIRST_POST_DATE: &str = "first_post_date";
    pub const TOTAL_POSTS: &str = "total_posts";
    pub const WEEK_ZERO_POST_COUNT: &str = "week_zero_post_count";
    pub const MONTH_ZERO_POST_UNIQUE_DAYS: &str = "month_zero_post_unique_days";
    pub const MONTHLY_POST_COUNTS: &str = "monthly_post_counts";
    pub const ACQUIRED: &str = "acquired";
    pub const ACTIVATED: &str = "activated";

    pub const FIRST_PURCHASE_DATE: &str = "first_purchase_date";
    pub const TOTAL_PURCHASES: &str = "total_purchases";
    pub const MONTHLY_PURCHASES: &str = "monthly_purchases";
    pub const MONTHLY_BOTTLES_PURCHASED: &str = "monthly_bottles_purchased";

    pub const MONTHLY_CORE_ACTIONS_INCL_POSTS: &str = "monthly_core_actions_incl_posts";
    pub const MONTH_ZERO_UNIQUE_DAYS_CORE_ACTIONS_INCL_POSTS: &str =
        "month_zero_unique_days_core_actions_incl_posts";
    pub const MONTHLY_CORE_ACTIONS_EXCL_POSTS: &str = "monthly_core_actions_excl_posts";
    pub const MONTH_ZERO_UNIQUE_DAYS_CORE_ACTIONS_EXCL_POSTS: &str =
        "month_zero_unique_days_core_actions_excl_posts";
    pub const CORE_ACTION_ACQUIRED: &str = "core_action_acquired";
    pub const CORE_ACTION_ACTIVATED: &str = "core_action_activated";

    pub const MONTHLY_SESSION_COUNT: &str = "monthly_session_count";
    pub const MONTHLY_TOTAL_SESSION_SECONDS: &str = "monthly_total_session_seconds";
    pub const MONTHLY_AVERAGE_CORE_ACTIONS_PER_SESSION: &str =
        "monthly_average_core_actions_per_session";
    pub const MONTHLY_AVERAGE_SECONDS_PER_SESSION: &str = "monthly_average_seconds_per_session";
}

pub fn action_monthly_field(action_field: &str) -> String {
    format!("monthly_{action_field}_count")
}

pub fn action_month_zero_days_field(action_field: &str) -> String {
    format!("month_zero_unique_days_{action_field}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl FieldValue {
    fn text(value: Option<&str>) -> Self {
        value.map_or(Self::Null, |v| Self::Text(v.to_string()))
    }

    fn timestamp(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(Self::Null, |v| Self::Text(dates::format_timestamp(v)))
    }

    fn count(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsFields(pub BTreeMap<String, FieldValue>);

impl StatsFields {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn int(&self, name: &str) -> i64 {
        match self.get(name) {
            Some(FieldValue::Int(v)) => *v,
            Some(FieldValue::Float(v)) => *v as i64,
            _ => 0,
        }
    }

    pub fn bool(&self, name: &str) -> bool {
        matches!(self.get(name), Some(FieldValue::Bool(true)))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(FieldValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Monthly integer array, zero-padded to the full horizon.
    pub fn ints(&self, name: &str) -> Vec<i64> {
        let mut values = match self.get(name) {
            Some(FieldValue::Ints(v)) => v.clone(),
            Some(FieldValue::Floats(v)) => v.iter().map(|f| *f as i64).collect(),
            _ => Vec::new(),
        };
        values.resize(values.len().max(MONTH_SLOTS), 0);
        values
    }

    /// Monthly float array, zero-padded to the full horizon.
    pub fn floats(&self, name: &str) -> Vec<f64> {
        let mut values = match self.get(name) {
            Some(FieldValue::Floats(v)) => v.clone(),
            Some(FieldValue::Ints(v)) => v.iter().map(|i| *i as f64).collect(),
            _ => Vec::new(),
        };
        values.resize(values.len().max(MONTH_SLOTS), 0.0);
        values
    }
}

/// Everything an extractor may read.
pub struct ProjectionInput<'a> {
    pub user: &'a UserProfile,
    pub cohort: i64,
    pub checkpoint: &'a CheckpointSet,
}

impl ProjectionInput<'_> {
    fn action(&self, id: &str) -> Option<&EventBucket> {
        self.checkpoint.action(id)
    }

    fn session_counts(&self) -> Vec<i64> {
        self.action(SESSION.id)
            .map(|b| b.monthly_count.clone())
            .unwrap_or_else(|| vec![0; MONTH_SLOTS])
    }
}

pub enum Extractor {
    Computed(fn(&ProjectionInput<'_>) -> FieldValue),
    /// Monthly counts of one tracked action.
    ActionMonthly(&'static str),
    /// Distinct month-zero days of one tracked action.
    ActionMonthZeroDays(&'static str),
}

impl Extractor {
    pub fn extract(&self, input: &ProjectionInput<'_>) -> FieldValue {
        match self {
            Self::Computed(f) => f(input),
            Self::ActionMonthly(id) => FieldValue::Ints(
                input
                    .action(id)
                    .map(|b| b.monthly_count.clone())
                    .unwrap_or_else(|| vec![0; MONTH_SLOTS]),
            ),
            Self::ActionMonthZeroDays(id) => {
                FieldValue::count(input.action(id).map_or(0, EventBucket::month_zero_unique_days))
            }
        }
    }
}

pub struct FieldSpec {
    pub name: String,
    pub extractor: Extractor,
}

fn computed(name: &str, f: fn(&ProjectionInput<'_>) -> FieldValue) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        extractor: Extractor::Computed(f),
    }
}

/// Element-wise `numerators[i] / denominators[i]`, with division by zero
/// defined as zero.
pub fn array_divide(numerators: &[f64], denominators: &[i64]) -> Vec<f64> {
    numerators
        .iter()
        .zip(denominators)
        .map(|(n, d)| if *d == 0 { 0.0 } else { n / *d as f64 })
        .collect()
}

fn build_table() -> Vec<FieldSpec> {
    use fields::*;

    let mut table = vec![
        computed(COHORT, |i| FieldValue::Int(i.cohort)),
        computed(USER_ID, |i| FieldValue::Text(i.user.id.clone())),
        computed(PEOPLE_ID, |i| FieldValue::text(i.user.people_id.as_deref())),
        computed(USERNAME, |i| FieldValue::text(i.user.username.as_deref())),
        computed(EMAIL, |i| FieldValue::text(i.user.email.as_deref())),
        computed(SIGNUP, |i| FieldValue::timestamp(Some(i.user.created_at))),
        computed(SIGNUP_DAY, |i| {
            FieldValue::Text(dates::format_day(i.user.created_at.date_naive()))
        }),
        computed(SIGNUP_WEEK, |i| {
            FieldValue::Text(dates::format_day(dates::cohort_date(i.cohort)))
        }),
        computed(SIGNUP_SOURCE, |i| FieldValue::text(i.user.signup_source.as_deref())),
        computed(EMAIL_IS_VERIFIED, |i| FieldValue::Bool(i.user.email_verified)),
        computed(DATE_OF_BIRTH, |i| {
            i.user
                .date_of_birth
                .map_or(FieldValue::Null, |d| FieldValue::Text(dates::format_day(d)))
        }),
        computed(FACEBOOK_ID, |i| FieldValue::text(i.user.facebook_id.as_deref())),
        computed(FOLLOWER_COUNT, |i| {
            i.user.follower_count.map_or(FieldValue::Null, FieldValue::Int)
        }),
        computed(FOLLOWING_COUNT, |i| {
            i.user.following_count.map_or(FieldValue::Null, FieldValue::Int)
        }),
        computed(LAST_NOTIFICATION_DATE, |i| {
            FieldValue::timestamp(i.user.last_notification_at)
        }),
        computed(FIRST_POST_DATE, |i| FieldValue::timestamp(i.checkpoint.posts.first_seen)),
        computed(TOTAL_POSTS, |i| FieldValue::Int(i.checkpoint.posts.total_count)),
        computed(WEEK_ZERO_POST_COUNT, |i| {
            FieldValue::Int(i.checkpoint.posts.week_zero_count)
        }),
        computed(MONTH_ZERO_POST_UNIQUE_DAYS, |i| {
            FieldValue::count(i.checkpoint.posts.month_zero_unique_days())
        }),
        computed(MONTHLY_POST_COUNTS, |i| {
            FieldValue::Ints(i.checkpoint.posts.monthly_count.clone())
        }),
        computed(ACQUIRED, |i| FieldValue::Bool(i.checkpoint.posts.engagement().acquisition)),
        computed(ACTIVATED, |i| FieldValue::Bool(i.checkpoint.posts.engagement().activation)),
        computed(FIRST_PURCHASE_DATE, |i| {
            FieldValue::timestamp(i.checkpoint.orders.first_seen)
        }),
        computed(TOTAL_PURCHASES, |i| FieldValue::Int(i.checkpoint.orders.total_count)),
        computed(MONTHLY_PURCHASES, |i| {
            FieldValue::Ints(i.checkpoint.orders.monthly_count.clone())
        }),
        computed(MONTHLY_BOTTLES_PURCHASED, |i| {
            FieldValue::Ints(i.checkpoint.monthly_bottles.clone())
        }),
    ];

    for spec in actions::tracked_actions() {
        table.push(FieldSpec {
            name: action_monthly_field(spec.field),
            extractor: Extractor::ActionMonthly(spec.id),
        });
        table.push(FieldSpec {
            name: action_month_zero_days_field(spec.field),
            extractor: Extractor::ActionMonthZeroDays(spec.id),
        });
    }

    table.extend([
        computed(MONTHLY_CORE_ACTIONS_INCL_POSTS, |i| {
            FieldValue::Ints(i.checkpoint.global_incl_posts.monthly_count.clone())
        }),
        computed(MONTH_ZERO_UNIQUE_DAYS_CORE_ACTIONS_INCL_POSTS, |i| {
            FieldValue::count(i.checkpoint.global_incl_posts.month_zero_unique_days())
        }),
        computed(MONTHLY_CORE_ACTIONS_EXCL_POSTS, |i| {
            FieldValue::Ints(i.checkpoint.global_excl_posts.monthly_count.clone())
        }),
        computed(MONTH_ZERO_UNIQUE_DAYS_CORE_ACTIONS_EXCL_POSTS, |i| {
            FieldValue::count(i.checkpoint.global_excl_posts.month_zero_unique_days())
        }),
        computed(CORE_ACTION_ACQUIRED, |i| {
            FieldValue::Bool(i.checkpoint.global_incl_posts.engagement().acquisition)
        }),
        computed(CORE_ACTION_ACTIVATED, |i| {
            FieldValue::Bool(i.checkpoint.global_incl_posts.engagement().activation)
        }),
        computed(MONTHLY_TOTAL_SESSION_SECONDS, |i| {
            FieldValue::Floats(i.checkpoint.monthly_session_seconds.clone())
        }),
        computed(MONTHLY_AVERAGE_CORE_ACTIONS_PER_SESSION, |i| {
            let actions: Vec<f64> = i
                .checkpoint
                .global_incl_posts
                .monthly_count
                .iter()
                .map(|c| *c as f64)
                .collect();
            FieldValue::Floats(array_divide(&actions, &i.session_counts()))
        }),
        computed(MONTHLY_AVERAGE_SECONDS_PER_SESSION, |i| {
            FieldValue::Floats(array_divide(
                &i.checkpoint.monthly_session_seconds,
                &i.session_counts(),
            ))
        }),
    ]);

    table
}

pub fn projection_table() -> &'static [FieldSpec] {
    static TABLE: OnceLock<Vec<FieldSpec>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

pub fn project(input: &ProjectionInput<'_>) -> StatsFields {
    StatsFields(
        projection_table()
            .iter()
            .map(|spec| (spec.name.clone(), spec.extractor.extract(input)))
            .collect(),
    )
}
