// src/window.rs
//! Random date-window selection for "scrape random".

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Duration, Months, Utc};
use rand::Rng;
use serde::Serialize;

use crate::info::FetchOptions;

/// Look-back range chosen in the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DateRange {
    #[default]
    All,
    Day,
    Week,
    Month,
    Year,
}

impl DateRange {
    /// Earliest instant the range allows. `All` starts at the Unix epoch.
    pub fn floor(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let floor = match self {
            DateRange::All => None,
            DateRange::Day => now.checked_sub_signed(Duration::days(1)),
            DateRange::Week => now.checked_sub_signed(Duration::days(7)),
            DateRange::Month => now.checked_sub_months(Months::new(1)),
            DateRange::Year => now.checked_sub_months(Months::new(12)),
        };
        floor.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DateRange::All => "",
            DateRange::Day => "1d",
            DateRange::Week => "1w",
            DateRange::Month => "1m",
            DateRange::Year => "1y",
        }
    }
}

impl FromStr for DateRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "" | "all" => DateRange::All,
            "1d" => DateRange::Day,
            "1w" => DateRange::Week,
            "1m" => DateRange::Month,
            "1y" => DateRange::Year,
            other => bail!("unknown date range: {other:?}"),
        })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub since: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub until: DateTime<Utc>,
}

impl DateWindow {
    pub fn options(&self) -> FetchOptions {
        FetchOptions::between(self.since, self.until)
    }
}

/// Pick a random window of at most `span_days` days inside
/// `[max(provider_min, range floor), now]`.
///
/// Guarantees `floor <= since <= until <= now` and `until - since <= span`.
pub fn select_window<R>(
    rng: &mut R,
    provider_min: Option<DateTime<Utc>>,
    range: DateRange,
    span_days: i64,
    now: DateTime<Utc>,
) -> DateWindow
where
    R: Rng,
{
    let mut floor = range.floor(now);
    if let Some(min) = provider_min {
        floor = floor.max(min);
    }
    let floor = floor.min(now);

    let lo = floor.timestamp_millis();
    let hi = now.timestamp_millis();
    let since_ms = if hi > lo { rng.random_range(lo..=hi) } else { hi };
    let mut since = DateTime::<Utc>::from_timestamp_millis(since_ms).unwrap_or(floor);

    let span = Duration::try_days(span_days.max(0)).unwrap_or(Duration::MAX);
    let until = match since.checked_add_signed(span) {
        Some(u) if u <= now => u,
        // Window would end in the future: pin it to now and shorten if needed.
        _ => {
            since = now.checked_sub_signed(span).unwrap_or(floor).max(floor);
            now
        }
    };

    DateWindow { since, until }
}
