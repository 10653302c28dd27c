// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod client;
pub mod config;
pub mod events;
pub mod info;
pub mod metrics;
pub mod oauth;
pub mod paginate;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod resolve;
pub mod scrape;
pub mod session;
pub mod text;
pub mod timeutil;
pub mod window;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::info::{FetchOptions, FetchResult, ScrapeInfo};
pub use crate::provider::{Provider, ProviderAdapter};
pub use crate::registry::{ProviderCatalog, ProviderRegistry};

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tracing::{info, warn};

use crate::client::{ClientRegistries, CookieSigner};
use crate::config::AppConfig;
use crate::session::{PopupController, PopupRegistry};

/// Build the full router (API + `/metrics`) from a configuration.
pub fn app_from_config(config: &AppConfig) -> Result<Router> {
    let catalog = providers::build_catalog(config).context("build provider catalog")?;
    info!(providers = ?catalog.names(), "providers available");

    let metrics = crate::metrics::Metrics::init(catalog.len())?;
    let popups = Arc::new(PopupRegistry::new());
    let clients = Arc::new(ClientRegistries::new(
        Arc::new(catalog),
        Arc::clone(&popups) as Arc<dyn PopupController>,
        config.auth.timing(),
        config.client_idle(),
    ));

    let secure = config.secure_cookies();
    let signer = if config.server.session_secret.is_empty() {
        warn!("no session secret configured; client cookies will not survive a restart");
        CookieSigner::ephemeral(secure)
    } else {
        CookieSigner::new(&config.server.session_secret, secure)
    };

    let state = api::AppState::new(clients, popups, signer);
    Ok(api::router(state).merge(metrics.router()))
}

/// Same as [`app_from_config`], with configuration from the usual places.
pub fn app() -> Result<Router> {
    let config = AppConfig::load_default()?;
    app_from_config(&config)
}
