//! Calendar helpers for cohort weeks.
//!
//! A cohort week is the number of whole ISO weeks (Monday start, UTC) between
//! the week containing a signup and week zero, which starts on 2013-06-03.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Monday that opens cohort week zero.
pub fn week_zero_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2013, 6, 3).unwrap_or(NaiveDate::MIN)
}

/// Sunday that closes cohort week zero. Cohort records are dated by the
/// Sunday ending their week.
pub fn week_zero_end() -> NaiveDate {
    week_zero_start() + Duration::days(6)
}

pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

pub fn cohort_week_of_date(date: NaiveDate) -> i64 {
    (start_of_week(date) - week_zero_start())
        .num_days()
        .div_euclid(7)
}

pub fn cohort_week(at: DateTime<Utc>) -> i64 {
    cohort_week_of_date(at.date_naive())
}

/// Sunday closing `week`.
pub fn cohort_date(week: i64) -> NaiveDate {
    week_zero_end() + Duration::weeks(week)
}

/// Monday opening `week`.
pub fn cohort_week_start(week: i64) -> NaiveDate {
    week_zero_start() + Duration::weeks(week)
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    NaiveDateTime::new(date, NaiveTime::MIN).and_utc()
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn format_day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn week_zero_boundaries() {
        assert_eq!(week_zero_start(), day(2013, 6, 3));
        assert_eq!(week_zero_end(), day(2013, 6, 9));
        assert_eq!(cohort_week_of_date(day(2013, 6, 3)), 0);
        assert_eq!(cohort_week_of_date(day(2013, 6, 9)), 0);
        assert_eq!(cohort_week_of_date(day(2013, 6, 10)), 1);
    }

    #[test]
    fn days_before_week_zero_are_negative() {
        assert_eq!(cohort_week_of_date(day(2013, 6, 2)), -1);
    }

    #[test]
    fn cohort_week_uses_utc_day() {
        let late_sunday = Utc.with_ymd_and_hms(2013, 6, 16, 23, 59, 59).unwrap();
        assert_eq!(cohort_week(late_sunday), 1);
        let monday = Utc.with_ymd_and_hms(2013, 6, 17, 0, 0, 0).unwrap();
        assert_eq!(cohort_week(monday), 2);
    }

    #[test]
    fn cohort_date_is_sunday_of_week() {
        assert_eq!(cohort_date(0), day(2013, 6, 9));
        assert_eq!(cohort_date(3), day(2013, 6, 30));
        assert_eq!(cohort_week_start(3), day(2013, 6, 24));
        assert_eq!(cohort_week_of_date(cohort_date(52)), 52);
    }
}
