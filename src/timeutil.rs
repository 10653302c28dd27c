// src/timeutil.rs
//! Conversions between Unix timestamps and calendar dates.
//!
//! Every calendar computation in the crate is done in UTC.

use chrono::{DateTime, Datelike, TimeZone, Utc};

/// Unix timestamp (seconds) of `date`, truncated toward negative infinity.
pub fn timestamp(date: DateTime<Utc>) -> i64 {
    date.timestamp()
}

/// Date for a Unix timestamp in seconds. `None` when out of chrono's range.
pub fn from_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

/// First instant of `year`.
pub fn year_start(year: i32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()
}

/// First instant of zero-based `month0` in `year`. Months past December roll
/// into the following year, so `month_start(y, 12)` is January 1st of `y + 1`.
pub fn month_start(year: i32, month0: u32) -> Option<DateTime<Utc>> {
    let year = year.checked_add(i32::try_from(month0 / 12).ok()?)?;
    let month = month0 % 12 + 1;
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

/// `[Jan 1 year, Jan 1 year+1)`.
pub fn year_range(year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    Some((year_start(year)?, year_start(year.checked_add(1)?)?))
}

/// `[month start, next month start)` for a zero-based month.
pub fn month_range(year: i32, month0: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    Some((month_start(year, month0)?, month_start(year, month0 + 1)?))
}

/// Current calendar year in UTC.
pub fn current_year(now: DateTime<Utc>) -> i32 {
    now.year()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_roundtrips_whole_seconds() {
        let d = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(from_timestamp(timestamp(d)), Some(d));
    }

    #[test]
    fn month_start_rolls_into_next_year() {
        let d = month_start(2021, 12).unwrap();
        assert_eq!(d, Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap());
        let (a, b) = month_range(2021, 11).unwrap();
        assert_eq!(a.month(), 12);
        assert_eq!(b.year(), 2022);
    }

    #[test]
    fn year_range_is_half_open_calendar_year() {
        let (a, b) = year_range(2004).unwrap();
        assert_eq!(timestamp(a), 1_072_915_200);
        assert_eq!(b.year(), 2005);
    }
}
