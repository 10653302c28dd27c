// src/scrape.rs
//! "Scrape random": authorize, bound the history, pick a random window and
//! fetch it.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::info::{FetchOptions, FetchResult};
use crate::provider::Provider;
use crate::window::{select_window, DateRange};

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutcome {
    pub options: FetchOptions,
    pub info: FetchResult,
}

/// Providers without dates are fetched with empty options.
pub async fn scrape_random<R>(provider: &Provider, range: DateRange, span_days: i64, rng: &mut R) -> ScrapeOutcome
where
    R: Rng,
{
    if !provider.has_date() {
        let options = FetchOptions::default();
        let info = provider.fetch(&options).await;
        return ScrapeOutcome { options, info };
    }

    // One login attempt per scrape: a refusal is reported as is.
    let status = provider.authorizer().ensure().await;
    if !status.is_connected() {
        info!(target: "scrape", provider = provider.name(), status = status.as_str(), "not authorized");
        return ScrapeOutcome {
            options: FetchOptions::default(),
            info: FetchResult::failure(status.fetch_error(provider.name())),
        };
    }

    // Absent min date: no restriction beyond the range floor.
    let min_date = match provider.min_date() {
        Some(d) => Some(d),
        None => provider.get_min_date().await,
    };

    let window = select_window(rng, min_date, range, span_days, Utc::now());
    info!(
        target: "scrape",
        provider = provider.name(),
        range = %range,
        span_days,
        since = %window.since,
        until = %window.until,
        "random window selected"
    );

    let options = window.options();
    let info = provider.fetch(&options).await;
    ScrapeOutcome { options, info }
}
