// src/registry.rs
//! Provider catalog (what can be offered) and provider registry (the live
//! providers of one client), passed to whoever needs provider lookup.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::events::EventBus;
use crate::oauth::LoginFlow;
use crate::provider::{Provider, ProviderAdapter, ProviderSummary};
use crate::session::{AuthTiming, Authorizer, PopupController, SessionStore};

/// Shared pieces every provider's authorizer is built from.
#[derive(Clone)]
pub struct RegistryContext {
    pub store: Arc<SessionStore>,
    pub popups: Arc<dyn PopupController>,
    pub timing: AuthTiming,
}

impl RegistryContext {
    pub fn new(store: Arc<SessionStore>, popups: Arc<dyn PopupController>, timing: AuthTiming) -> Self {
        Self {
            store,
            popups,
            timing,
        }
    }
}

#[derive(Clone)]
struct CatalogEntry {
    adapter: Arc<dyn ProviderAdapter>,
    login: LoginFlow,
}

/// Adapters and their login flows. Stateless and shared by every client.
#[derive(Clone, Default)]
pub struct ProviderCatalog {
    entries: Vec<CatalogEntry>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names are unique (case-insensitive).
    pub fn add(&mut self, adapter: Arc<dyn ProviderAdapter>, login: LoginFlow) -> Result<()> {
        if self
            .entries
            .iter()
            .any(|e| e.adapter.name().eq_ignore_ascii_case(adapter.name()))
        {
            bail!("provider {} already in catalog", adapter.name());
        }
        self.entries.push(CatalogEntry { adapter, login });
        Ok(())
    }

    /// Fresh registry over `ctx`, with its own event buses and caches.
    pub fn instantiate(&self, ctx: &RegistryContext) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for e in &self.entries {
            registry.register_adapter(Arc::clone(&e.adapter), e.login.clone(), ctx)?;
        }
        Ok(registry)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.adapter.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names are unique (case-insensitive). Announces the provider once added.
    pub fn register(&mut self, provider: Provider) -> Result<Arc<Provider>> {
        if self.get(provider.name()).is_some() {
            bail!("provider {} already registered", provider.name());
        }
        let provider = Arc::new(provider);
        self.providers.push(Arc::clone(&provider));
        provider.announce();
        Ok(provider)
    }

    /// Wire an adapter to its own event bus and authorizer, then register it.
    pub fn register_adapter(
        &mut self,
        adapter: Arc<dyn ProviderAdapter>,
        login: LoginFlow,
        ctx: &RegistryContext,
    ) -> Result<Arc<Provider>> {
        let name = adapter.name().to_string();
        let events = Arc::new(EventBus::new(name.clone()));
        let authorizer = Authorizer::new(
            name,
            login,
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.popups),
            Arc::clone(&events),
            ctx.timing,
        );
        self.register(Provider::new(adapter, authorizer, events))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Provider>> {
        self.providers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Provider>> {
        self.providers.iter()
    }

    pub fn summaries(&self) -> Vec<ProviderSummary> {
        self.providers.iter().map(|p| p.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
