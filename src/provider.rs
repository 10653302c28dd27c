// src/provider.rs
//! Provider descriptor: name, date capability, cached minimum date and the
//! event bus, wrapped around a vendor adapter.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};

use crate::events::{EventBus, EventKind, ListenerId, ProviderEvent};
use crate::info::{FetchOptions, FetchResult, ScrapeInfo};
use crate::session::{
    AuthBegin, AuthInfo, AuthOutcome, AuthStatus, Authorizer, SessionExpired, StoredSession,
};

/// Vendor-specific half of a provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn has_date(&self) -> bool;

    /// First day of the earliest month with content. Only called when
    /// `has_date()` is true.
    async fn resolve_min_date(
        &self,
        session: &StoredSession,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Return [`SessionExpired`] (possibly wrapped in context) when the
    /// vendor rejects the credentials.
    async fn fetch(&self, session: &StoredSession, options: &FetchOptions) -> Result<ScrapeInfo>;
}

/// Row of `GET /providers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummary {
    pub name: String,
    pub has_date: bool,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub min_date: Option<DateTime<Utc>>,
    pub authorized: bool,
}

pub struct Provider {
    name: String,
    has_date: bool,
    min_date: RwLock<Option<DateTime<Utc>>>,
    events: Arc<EventBus>,
    authorizer: Authorizer,
    adapter: Arc<dyn ProviderAdapter>,
}

impl Provider {
    /// `authorizer` must dispatch on the same `events` bus.
    pub fn new(adapter: Arc<dyn ProviderAdapter>, authorizer: Authorizer, events: Arc<EventBus>) -> Self {
        Self {
            name: adapter.name().to_string(),
            has_date: adapter.has_date(),
            min_date: RwLock::new(None),
            events,
            authorizer,
            adapter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_date(&self) -> bool {
        self.has_date
    }

    /// Cached value only; see [`Provider::get_min_date`].
    pub fn min_date(&self) -> Option<DateTime<Utc>> {
        *self.min_date.read().expect("min_date poisoned")
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub fn is_authorized(&self) -> bool {
        self.authorizer.is_authorized()
    }

    pub fn summary(&self) -> ProviderSummary {
        ProviderSummary {
            name: self.name.clone(),
            has_date: self.has_date,
            min_date: self.min_date(),
            authorized: self.is_authorized(),
        }
    }

    pub fn add_event_listener<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.events.add_event_listener(kind, callback)
    }

    pub fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.events.remove_event_listener(kind, id)
    }

    /// Tell listeners the provider is ready. Called once by the registry.
    pub fn announce(&self) {
        if self.is_authorized() {
            self.events
                .dispatch_event(ProviderEvent::auth(true, "Signed in"));
        }
        self.events
            .dispatch_event(ProviderEvent::loaded("API loaded"));
        info!(target: "provider", provider = %self.name, has_date = self.has_date, "provider loaded");
    }

    pub async fn authorize(&self) -> AuthInfo {
        self.authorizer.authorize().await
    }

    pub fn begin_authorize(&self) -> AuthBegin {
        self.authorizer.begin()
    }

    pub fn deliver(&self, outcome: AuthOutcome) -> bool {
        self.authorizer.deliver(outcome)
    }

    pub fn disconnect(&self) -> bool {
        info!(target: "provider", provider = %self.name, "disconnect");
        self.authorizer.disconnect()
    }

    /// Earliest month with content, resolved once and cached.
    ///
    /// Needs an existing session; without one nothing is probed and the
    /// result is not cached.
    pub async fn get_min_date(&self) -> Option<DateTime<Utc>> {
        if !self.has_date {
            return None;
        }
        if let Some(cached) = self.min_date() {
            return Some(cached);
        }
        let Some(session) = self.authorizer.session() else {
            warn!(target: "provider", provider = %self.name, "min date requested without a session");
            return None;
        };

        match self.adapter.resolve_min_date(&session, Utc::now()).await {
            Ok(Some(date)) => {
                *self.min_date.write().expect("min_date poisoned") = Some(date);
                info!(target: "provider", provider = %self.name, min_date = %date, "min date resolved");
                Some(date)
            }
            Ok(None) => None,
            Err(e) => {
                self.check_session_lost(&e);
                warn!(target: "provider", provider = %self.name, error = ?e, "min date resolution failed");
                None
            }
        }
    }

    /// Authorize, then fetch content for `options`.
    pub async fn fetch(&self, options: &FetchOptions) -> FetchResult {
        let status = self.authorizer.ensure().await;
        if !status.is_connected() {
            counter!("fetch_total", "provider" => self.name.clone(), "outcome" => "unauthorized").increment(1);
            return FetchResult::failure(status.fetch_error(&self.name));
        }
        let Some(session) = self.authorizer.session() else {
            counter!("fetch_total", "provider" => self.name.clone(), "outcome" => "unauthorized").increment(1);
            return FetchResult::failure(AuthStatus::Error.fetch_error(&self.name));
        };

        match self.adapter.fetch(&session, options).await {
            Ok(info) => {
                counter!("fetch_total", "provider" => self.name.clone(), "outcome" => "success").increment(1);
                info!(
                    target: "provider",
                    provider = %self.name,
                    sentences = info.sentences.len(),
                    images = info.images.len(),
                    "fetch ok"
                );
                FetchResult::Success(info)
            }
            Err(e) => {
                counter!("fetch_total", "provider" => self.name.clone(), "outcome" => "failure").increment(1);
                if self.check_session_lost(&e) {
                    return FetchResult::failure(AuthStatus::Unknown.fetch_error(&self.name));
                }
                warn!(target: "provider", provider = %self.name, error = ?e, "fetch failed");
                FetchResult::failure(e.to_string())
            }
        }
    }

    fn check_session_lost(&self, e: &anyhow::Error) -> bool {
        let lost = e.chain().any(|c| c.is::<SessionExpired>());
        if lost {
            self.authorizer.invalidate();
        }
        lost
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("has_date", &self.has_date)
            .field("min_date", &self.min_date())
            .finish_non_exhaustive()
    }
}
