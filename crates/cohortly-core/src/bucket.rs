//! Signup-relative event bucketing.
//!
//! Every event is placed relative to the owning user's signup: week zero,
//! week one, and one of [`MONTH_SLOTS`] thirty-day months. Buckets are folded
//! incrementally, so a bucket built from a prefix of a user's events and then
//! fed the remainder equals one built from all events in a single pass.

use std::collections::BTreeSet;
use std::ops::AddAssign;

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Last month offset that is bucketed. Later events only move the totals.
pub const LAST_MONTH: usize = 60;
pub const MONTH_SLOTS: usize = LAST_MONTH + 1;

const DAYS_PER_MONTH: i64 = 30;

/// Cutoffs computed once per user from the signup timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct DateBoundaries {
    pub end_of_week_zero: DateTime<Utc>,
    pub end_of_week_one: DateTime<Utc>,
    /// `end_of_month[i]` is the exclusive upper bound of month offset `i`.
    pub end_of_month: Vec<DateTime<Utc>>,
}

impl DateBoundaries {
    pub fn from_signup(signup: DateTime<Utc>) -> Self {
        Self {
            end_of_week_zero: signup + Duration::days(7),
            end_of_week_one: signup + Duration::days(14),
            end_of_month: (0..MONTH_SLOTS as i64)
                .map(|i| signup + Duration::days(DAYS_PER_MONTH * (i + 1)))
                .collect(),
        }
    }

    /// First month offset whose upper boundary lies after `date`.
    pub fn month_slot(&self, date: DateTime<Utc>) -> Option<usize> {
        let slot = self.end_of_month.partition_point(|end| *end <= date);
        (slot < self.end_of_month.len()).then_some(slot)
    }

    pub fn in_month_zero(&self, date: DateTime<Utc>) -> bool {
        self.end_of_month
            .first()
            .is_some_and(|end_of_month_zero| date < *end_of_month_zero)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBucket {
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub week_zero_count: i64,
    pub week_one_count: i64,
    pub monthly_count: Vec<i64>,
    /// Distinct UTC calendar days with activity in month zero.
    pub month_zero_days: BTreeSet<NaiveDate>,
    pub total_count: i64,
}

impl Default for EventBucket {
    fn default() -> Self {
        Self {
            first_seen: None,
            last_seen: None,
            week_zero_count: 0,
            week_one_count: 0,
            monthly_count: vec![0; MONTH_SLOTS],
            month_zero_days: BTreeSet::new(),
            total_count: 0,
        }
    }
}

impl EventBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, boundaries: &DateBoundaries, date: DateTime<Utc>) {
        self.total_count += 1;
        self.first_seen = Some(self.first_seen.map_or(date, |seen| seen.min(date)));
        self.last_seen = Some(self.last_seen.map_or(date, |seen| seen.max(date)));

        if date < boundaries.end_of_week_zero {
            self.week_zero_count += 1;
        } else if date < boundaries.end_of_week_one {
            self.week_one_count += 1;
        }

        if boundaries.in_month_zero(date) {
            self.month_zero_days.insert(date.date_naive());
        }

        if let Some(slot) = boundaries.month_slot(date) {
            if self.monthly_count.len() < MONTH_SLOTS {
                self.monthly_count.resize(MONTH_SLOTS, 0);
            }
            self.monthly_count[slot] += 1;
        }
    }

    pub fn month_count(&self, month: usize) -> i64 {
        self.monthly_count.get(month).copied().unwrap_or(0)
    }

    pub fn month_zero_unique_days(&self) -> usize {
        self.month_zero_days.len()
    }

    pub fn engagement(&self) -> Engagement {
        check_acquisition_activation(self.month_count(0), self.month_zero_unique_days())
    }
}

/// Strict `>` against a fetch cursor; no cursor means nothing was folded yet.
pub fn is_after_cursor(date: DateTime<Utc>, cursor: Option<DateTime<Utc>>) -> bool {
    cursor.map_or(true, |seen| date > seen)
}

pub fn compute_event_counts<I>(dates: I, boundaries: &DateBoundaries) -> EventBucket
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut bucket = EventBucket::new();
    for date in dates {
        bucket.record(boundaries, date);
    }
    bucket
}

/// Adds `amount` into the month slot of `date`, if it falls inside the horizon.
pub fn add_monthly_amount<T>(slots: &mut Vec<T>, boundaries: &DateBoundaries, date: DateTime<Utc>, amount: T)
where
    T: AddAssign + Copy + Default,
{
    if let Some(slot) = boundaries.month_slot(date) {
        if slots.len() < MONTH_SLOTS {
            slots.resize(MONTH_SLOTS, T::default());
        }
        slots[slot] += amount;
    }
}

/// Weighted variant of the month placement, e.g. bottles per purchase or
/// seconds per session.
pub fn monthly_amounts<T, I>(events: I, boundaries: &DateBoundaries) -> Vec<T>
where
    T: AddAssign + Copy + Default,
    I: IntoIterator<Item = (DateTime<Utc>, T)>,
{
    let mut slots = vec![T::default(); MONTH_SLOTS];
    for (date, amount) in events {
        add_monthly_amount(&mut slots, boundaries, date, amount);
    }
    slots
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Engagement {
    pub acquisition: bool,
    pub activation: bool,
}

pub fn check_acquisition_activation(month_zero_count: i64, unique_days: usize) -> Engagement {
    let acquisition = month_zero_count >= 1;
    Engagement {
        acquisition,
        activation: acquisition && unique_days >= 2,
    }
}
