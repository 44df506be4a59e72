//! Persisted form of a user's buckets.
//!
//! Timestamps are stored as epoch milliseconds and month-zero days as
//! `YYYY-MM-DD` strings. Monthly arrays stored under an older, shorter horizon
//! are right-padded with zeros on load.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::actions;
use crate::bucket::{EventBucket, MONTH_SLOTS};
use crate::error::CoreError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredBucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
    pub week_zero_count: i64,
    pub week_one_count: i64,
    pub monthly_count: Vec<i64>,
    pub month_zero_days: Vec<String>,
    pub total_count: i64,
}

pub fn serialize(bucket: &EventBucket) -> StoredBucket {
    StoredBucket {
        first_seen: bucket.first_seen.map(|d| d.timestamp_millis()),
        last_seen: bucket.last_seen.map(|d| d.timestamp_millis()),
        week_zero_count: bucket.week_zero_count,
        week_one_count: bucket.week_one_count,
        monthly_count: bucket.monthly_count.clone(),
        month_zero_days: bucket
            .month_zero_days
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect(),
        total_count: bucket.total_count,
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, CoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| CoreError::Checkpoint(format!("timestamp out of range: {millis}")))
}

pub fn deserialize(stored: StoredBucket) -> Result<EventBucket, CoreError> {
    let month_zero_days = stored
        .month_zero_days
        .iter()
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| CoreError::Checkpoint(format!("bad day key {raw:?}: {e}")))
        })
        .collect::<Result<_, _>>()?;

    Ok(EventBucket {
        first_seen: stored.first_seen.map(millis_to_datetime).transpose()?,
        last_seen: stored.last_seen.map(millis_to_datetime).transpose()?,
        week_zero_count: stored.week_zero_count,
        week_one_count: stored.week_one_count,
        monthly_count: padded(stored.monthly_count),
        month_zero_days,
        total_count: stored.total_count,
    })
}

fn padded<T: Default + Clone>(mut values: Vec<T>) -> Vec<T> {
    if values.len() < MONTH_SLOTS {
        values.resize(MONTH_SLOTS, T::default());
    }
    values
}

/// All checkpointed state of one user.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSet {
    /// One bucket per tracked action id, `Session` included.
    pub actions: BTreeMap<String, EventBucket>,
    pub posts: EventBucket,
    pub orders: EventBucket,
    pub global_incl_posts: EventBucket,
    pub global_excl_posts: EventBucket,
    pub monthly_session_seconds: Vec<f64>,
    pub monthly_bottles: Vec<i64>,
}

impl Default for CheckpointSet {
    fn default() -> Self {
        Self {
            actions: actions::tracked_actions()
                .map(|spec| (spec.id.to_string(), EventBucket::new()))
                .collect(),
            posts: EventBucket::new(),
            orders: EventBucket::new(),
            global_incl_posts: EventBucket::new(),
            global_excl_posts: EventBucket::new(),
            monthly_session_seconds: vec![0.0; MONTH_SLOTS],
            monthly_bottles: vec![0; MONTH_SLOTS],
        }
    }
}

impl CheckpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(&self, id: &str) -> Option<&EventBucket> {
        self.actions.get(id)
    }

    pub fn action_mut(&mut self, id: &str) -> &mut EventBucket {
        self.actions.entry(id.to_string()).or_default()
    }

    pub fn last_seen(&self, id: &str) -> Option<DateTime<Utc>> {
        self.action(id).and_then(|b| b.last_seen)
    }

    /// Lower fetch bound covering every action in `ids`: the oldest
    /// `last_seen` among them, or `None` if any action has never been seen.
    pub fn fetch_cursor<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Option<DateTime<Utc>> {
        let mut cursor: Option<DateTime<Utc>> = None;
        for id in ids {
            let seen = self.last_seen(id)?;
            cursor = Some(cursor.map_or(seen, |c| c.min(seen)));
        }
        cursor
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(&StoredCheckpointSet::from(self))?)
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let stored: StoredCheckpointSet = serde_json::from_str(raw)?;
        stored.try_into()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredCheckpointSet {
    pub actions: BTreeMap<String, StoredBucket>,
    pub posts: StoredBucket,
    pub orders: StoredBucket,
    pub global_incl_posts: StoredBucket,
    pub global_excl_posts: StoredBucket,
    pub monthly_session_seconds: Vec<f64>,
    pub monthly_bottles: Vec<i64>,
}

impl From<&CheckpointSet> for StoredCheckpointSet {
    fn from(set: &CheckpointSet) -> Self {
        Self {
            actions: set
                .actions
                .iter()
                .map(|(id, bucket)| (id.clone(), serialize(bucket)))
                .collect(),
            posts: serialize(&set.posts),
            orders: serialize(&set.orders),
            global_incl_posts: serialize(&set.global_incl_posts),
            global_excl_posts: serialize(&set.global_excl_posts),
            monthly_session_seconds: set.monthly_session_seconds.clone(),
            monthly_bottles: set.monthly_bottles.clone(),
        }
    }
}

impl TryFrom<StoredCheckpointSet> for CheckpointSet {
    type Error = CoreError;

    fn try_from(stored: StoredCheckpointSet) -> Result<Self, CoreError> {
        let mut set = CheckpointSet::new();
        for (id, bucket) in stored.actions {
            set.actions.insert(id, deserialize(bucket)?);
        }
        set.posts = deserialize(stored.posts)?;
        set.orders = deserialize(stored.orders)?;
        set.global_incl_posts = deserialize(stored.global_incl_posts)?;
        set.global_excl_posts = deserialize(stored.global_excl_posts)?;
        set.monthly_session_seconds = padded(stored.monthly_session_seconds);
        set.monthly_bottles = padded(stored.monthly_bottles);
        Ok(set)
    }
}
