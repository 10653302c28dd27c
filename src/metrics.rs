// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// The recorder is process-global; installing it twice fails, so the handle
/// is kept here and shared.
static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// One-time metrics registration (so series carry help text on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("auth_attempts_total", "Login popups opened, by provider.");
        describe_counter!(
            "auth_outcomes_total",
            "Authorization outcomes delivered, by provider and status."
        );
        describe_counter!(
            "provider_listener_panics_total",
            "Event listeners that panicked during dispatch."
        );
        describe_counter!("min_date_probes_total", "Existence probes issued.");
        describe_counter!(
            "min_date_probe_errors_total",
            "Existence probes that failed and were treated as empty."
        );
        describe_counter!("scrape_pages_total", "Content pages fetched.");
        describe_counter!("scrape_page_errors_total", "Content page requests that failed.");
        describe_counter!(
            "scrape_items_dropped_total",
            "Items dropped for having neither text nor images."
        );
        describe_histogram!("scrape_page_ms", "Page fetch time in milliseconds.");
        describe_histogram!("provider_request_ms", "Vendor HTTP request time in milliseconds.");
        describe_counter!("provider_http_errors_total", "Vendor HTTP errors.");
        describe_counter!("fetch_total", "Fetch calls, by provider and outcome.");
        describe_gauge!("providers_registered", "Providers offered to every client.");
        describe_gauge!("clients_active", "Browser clients with a live provider registry.");
        describe_counter!(
            "auth_callbacks_rejected_total",
            "Login callbacks whose state matched no pending attempt."
        );
        describe_counter!(
            "token_exchanges_total",
            "Authorization code exchanges, by provider and outcome."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (once per process) and record the
    /// provider count.
    pub fn init(providers: usize) -> Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .context("prometheus: install recorder")
            })?
            .clone();

        ensure_metrics_described();
        gauge!("providers_registered").set(providers as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
