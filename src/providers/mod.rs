// src/providers/mod.rs
//! Vendor adapters and the shared HTTP plumbing they use.

pub mod facebook;
pub mod gmail;
pub mod imap;
pub mod linkedin;
pub mod twitter;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use metrics::{counter, histogram};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::{AppConfig, ProviderConfig};
use crate::oauth::{LoginFlow, OAuthClient};
use crate::paginate::PageLimits;
use crate::provider::ProviderAdapter;
use crate::registry::ProviderCatalog;
use crate::session::{SessionExpired, StoredSession};

pub use facebook::FacebookAdapter;
pub use gmail::GmailAdapter;
pub use imap::ImapAdapter;
pub use linkedin::LinkedInAdapter;
pub use twitter::TwitterAdapter;

/// JSON-over-HTTPS client shared by the adapters. Sends the session token as
/// a bearer credential and maps 401/403 to [`SessionExpired`].
#[derive(Debug, Clone)]
pub struct VendorHttp {
    provider: &'static str,
    client: reqwest::Client,
}

impl VendorHttp {
    pub fn new(provider: &'static str, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .with_context(|| format!("building {provider} http client"))?;
        Ok(Self { provider, client })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub async fn get_json<T>(
        &self,
        url: &str,
        session: &StoredSession,
        query: &[(&str, String)],
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let t0 = std::time::Instant::now();
        let resp = self
            .client
            .get(url)
            .bearer_auth(session.token.bearer())
            .query(query)
            .send()
            .await;
        histogram!("provider_request_ms", "provider" => self.provider)
            .record(t0.elapsed().as_secs_f64() * 1_000.0);

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                counter!("provider_http_errors_total", "provider" => self.provider).increment(1);
                warn!(target: "providers", provider = self.provider, error = ?e, "provider http error");
                return Err(e).with_context(|| format!("{} request failed", self.provider));
            }
        };

        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("{} http .text()", self.provider))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            counter!("provider_http_errors_total", "provider" => self.provider).increment(1);
            debug!(target: "providers", provider = self.provider, %status, "credentials rejected");
            return Err(anyhow::Error::new(SessionExpired))
                .with_context(|| format!("{} rejected the session", self.provider));
        }
        if !status.is_success() {
            counter!("provider_http_errors_total", "provider" => self.provider).increment(1);
            match vendor_error_message(&body) {
                Some(msg) => bail!(msg),
                None => bail!("{} API returned HTTP {}", self.provider, status.as_u16()),
            }
        }

        serde_json::from_str(&body).with_context(|| format!("parsing {} response", self.provider))
    }
}

/// Extract the human message from the common vendor error envelopes:
/// `{"error": {"message": ..}}`, `{"error": ".."}`, `{"detail": ".."}`.
pub(crate) fn vendor_error_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let msg = match v.get("error") {
        Some(serde_json::Value::Object(o)) => o.get("message").and_then(|m| m.as_str()),
        Some(serde_json::Value::String(s)) => Some(s.as_str()),
        _ => v.get("detail").and_then(|d| d.as_str()),
    }?;
    let msg = msg.trim();
    (!msg.is_empty()).then(|| msg.to_string())
}

pub(crate) fn limits_for(cfg: &ProviderConfig, max_pages: usize) -> PageLimits {
    PageLimits::new(cfg.min_items, cfg.max_page_size).with_max_pages(max_pages)
}

/// Login flow for one vendor: code grant with a token exchange when the
/// vendor has a token endpoint, credentials straight from the login page
/// otherwise.
fn login_flow(
    name: &'static str,
    cfg: &ProviderConfig,
    redirect_uri: String,
    timeout: Duration,
    user_agent: &str,
) -> Result<LoginFlow> {
    let mut flow = LoginFlow::new(cfg.login_url(&redirect_uri));
    if cfg.pkce {
        flow = flow.with_pkce();
    }
    if !cfg.token_url.is_empty() {
        if cfg.client_id.is_empty() {
            warn!(target: "providers", provider = name, "no client id configured; logins will fail");
        }
        let client = OAuthClient::new(
            name,
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
            cfg.token_url.clone(),
            redirect_uri,
            timeout,
            user_agent,
        )?
        .with_basic_auth(cfg.basic_auth);
        flow = flow.with_exchange(Arc::new(client));
    }
    Ok(flow)
}

/// Build every enabled vendor adapter with its login flow.
pub fn build_catalog(config: &AppConfig) -> Result<ProviderCatalog> {
    let timeout = config.request_timeout();
    let ua = config.server.user_agent.as_str();
    let max_pages = config.pagination.max_pages;
    let p = &config.providers;

    let mut adapters: Vec<(&'static str, Arc<dyn ProviderAdapter>, &ProviderConfig)> = Vec::new();
    if p.facebook.enabled {
        let http = VendorHttp::new(facebook::NAME, timeout, ua)?;
        let a: Arc<dyn ProviderAdapter> = Arc::new(FacebookAdapter::new(http, &p.facebook, max_pages));
        adapters.push((facebook::NAME, a, &p.facebook));
    }
    if p.gmail.enabled {
        let http = VendorHttp::new(gmail::NAME, timeout, ua)?;
        let a: Arc<dyn ProviderAdapter> = Arc::new(GmailAdapter::new(http, &p.gmail, max_pages));
        adapters.push((gmail::NAME, a, &p.gmail));
    }
    if p.linkedin.enabled {
        let http = VendorHttp::new(linkedin::NAME, timeout, ua)?;
        let a: Arc<dyn ProviderAdapter> = Arc::new(LinkedInAdapter::new(http, &p.linkedin));
        adapters.push((linkedin::NAME, a, &p.linkedin));
    }
    if p.twitter.enabled {
        let http = VendorHttp::new(twitter::NAME, timeout, ua)?;
        let a: Arc<dyn ProviderAdapter> = Arc::new(TwitterAdapter::new(http, &p.twitter, max_pages));
        adapters.push((twitter::NAME, a, &p.twitter));
    }
    if p.imap.enabled {
        if p.imap.api_base.is_empty() {
            bail!("IMAP is enabled but [providers.imap] api_base names no gateway");
        }
        let http = VendorHttp::new(imap::NAME, timeout, ua)?;
        let a: Arc<dyn ProviderAdapter> = Arc::new(ImapAdapter::new(http, &p.imap, max_pages));
        adapters.push((imap::NAME, a, &p.imap));
    }

    let mut catalog = ProviderCatalog::new();
    for (name, adapter, cfg) in adapters {
        let flow = login_flow(name, cfg, config.callback_url(name), timeout, ua)?;
        catalog.add(adapter, flow)?;
    }
    Ok(catalog)
}
