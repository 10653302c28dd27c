// src/resolve.rs
//! Minimum-date resolver.
//!
//! Finds the first month that holds any content: every year from the
//! provider's epoch to now is probed at once, then the 12 months of the
//! lowest year that answered.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use tracing::{debug, warn};

use crate::timeutil::{current_year, month_range, month_start, year_range};

/// "Does any content exist in `[since, until)`?"
#[async_trait]
pub trait ExistenceProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn probe_exists(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<bool>;

    /// Answers in input order. Failures count as "no content".
    async fn probe_batch(&self, ranges: &[(DateTime<Utc>, DateTime<Utc>)]) -> Vec<bool> {
        let answers = join_all(
            ranges
                .iter()
                .map(|(since, until)| self.probe_exists(*since, *until)),
        )
        .await;

        counter!("min_date_probes_total", "provider" => self.name().to_string())
            .increment(ranges.len() as u64);

        answers
            .into_iter()
            .zip(ranges)
            .map(|(res, (since, _))| match res {
                Ok(found) => found,
                Err(e) => {
                    counter!("min_date_probe_errors_total", "provider" => self.name().to_string())
                        .increment(1);
                    warn!(target: "resolve", provider = %self.name(), since = %since, error = ?e, "probe failed, treating as empty");
                    false
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinDateResolver {
    epoch_year: i32,
}

impl MinDateResolver {
    pub fn new(epoch_year: i32) -> Self {
        Self { epoch_year }
    }

    pub fn epoch_year(&self) -> i32 {
        self.epoch_year
    }

    /// First day of the earliest month with content, or `None`.
    pub async fn resolve<P>(&self, probe: &P, now: DateTime<Utc>) -> Option<DateTime<Utc>>
    where
        P: ExistenceProbe + ?Sized,
    {
        let last_year = current_year(now);
        if self.epoch_year > last_year {
            return None;
        }

        let (years, ranges): (Vec<i32>, Vec<_>) = (self.epoch_year..=last_year)
            .filter_map(|y| year_range(y).map(|r| (y, r)))
            .unzip();
        let hits = probe.probe_batch(&ranges).await;
        // Lowest year wins regardless of which answer arrived first.
        let year = years
            .iter()
            .zip(&hits)
            .find_map(|(y, hit)| hit.then_some(*y))?;
        debug!(target: "resolve", provider = %probe.name(), year, "earliest year with content");

        let (months, ranges): (Vec<u32>, Vec<_>) = (0u32..12)
            .filter_map(|m| month_range(year, m).map(|r| (m, r)))
            .unzip();
        let hits = probe.probe_batch(&ranges).await;
        let month = months
            .iter()
            .zip(&hits)
            .find_map(|(m, hit)| hit.then_some(*m))?;

        month_start(year, month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use chrono::TimeZone;

    struct Fixed {
        first: DateTime<Utc>,
        fail_year: Option<i32>,
    }

    #[async_trait]
    impl ExistenceProbe for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn probe_exists(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<bool> {
            if Some(current_year(since)) == self.fail_year {
                bail!("probe down");
            }
            Ok(until > self.first)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 6, 15, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn finds_first_month() {
        let probe = Fixed {
            first: Utc.with_ymd_and_hms(2009, 3, 15, 0, 0, 0).unwrap(),
            fail_year: None,
        };
        let got = MinDateResolver::new(2004).resolve(&probe, now()).await;
        assert_eq!(got, Some(Utc.with_ymd_and_hms(2009, 3, 1, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn empty_history_is_none() {
        let probe = Fixed {
            first: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            fail_year: None,
        };
        assert_eq!(MinDateResolver::new(2004).resolve(&probe, now()).await, None);
    }

    #[tokio::test]
    async fn failed_probe_counts_as_empty() {
        // 2009 errors out, so 2010 is the lowest year that answers.
        let probe = Fixed {
            first: Utc.with_ymd_and_hms(2009, 3, 15, 0, 0, 0).unwrap(),
            fail_year: Some(2009),
        };
        let got = MinDateResolver::new(2004).resolve(&probe, now()).await;
        assert_eq!(got, Some(Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap()));
    }
}
