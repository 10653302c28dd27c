// src/config/providers.rs
//! Per-provider settings. Each `[providers.<name>]` table only needs the keys
//! it overrides; everything else falls back to the vendor defaults below.

use serde::{Deserialize, Serialize};
use std::env;

use crate::oauth::append_query;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderConfig {
    pub enabled: bool,
    /// OAuth client / app id. Empty for the mailbox gateway.
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub authorize_url: String,
    /// Code exchange endpoint. Empty: the login page answers with
    /// credentials itself.
    pub token_url: String,
    pub pkce: bool,
    /// Client credentials go to the token endpoint as HTTP Basic.
    pub basic_auth: bool,
    pub scope: String,
    /// Vendor REST base, without trailing slash.
    pub api_base: String,
    /// Secondary base (Gmail: People API).
    pub aux_base: Option<String>,
    pub min_items: usize,
    pub max_page_size: usize,
    /// First year probed by the minimum-date resolver.
    pub epoch_year: i32,
}

/// Raw TOML table: every key optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSection {
    pub enabled: Option<bool>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub pkce: Option<bool>,
    pub basic_auth: Option<bool>,
    pub scope: Option<String>,
    pub api_base: Option<String>,
    pub aux_base: Option<String>,
    pub min_items: Option<usize>,
    pub max_page_size: Option<usize>,
    pub epoch_year: Option<i32>,
}

impl ProviderConfig {
    pub fn facebook() -> Self {
        Self {
            enabled: true,
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: "https://www.facebook.com/v2.7/dialog/oauth".into(),
            token_url: "https://graph.facebook.com/v2.7/oauth/access_token".into(),
            pkce: false,
            basic_auth: false,
            scope: "public_profile,user_posts,user_photos,user_friends".into(),
            api_base: "https://graph.facebook.com/v2.7".into(),
            aux_base: None,
            min_items: 100,
            max_page_size: 250,
            epoch_year: 2004,
        }
    }

    pub fn gmail() -> Self {
        Self {
            enabled: true,
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            pkce: true,
            basic_auth: false,
            scope: "https://www.googleapis.com/auth/gmail.readonly profile".into(),
            api_base: "https://gmail.googleapis.com/gmail/v1".into(),
            aux_base: Some("https://people.googleapis.com/v1".into()),
            min_items: 100,
            max_page_size: 100,
            epoch_year: 2000,
        }
    }

    pub fn twitter() -> Self {
        Self {
            enabled: true,
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: "https://twitter.com/i/oauth2/authorize".into(),
            token_url: "https://api.twitter.com/2/oauth2/token".into(),
            pkce: true,
            basic_auth: true,
            scope: "tweet.read users.read offline.access".into(),
            api_base: "https://api.twitter.com/2".into(),
            aux_base: None,
            min_items: 100,
            max_page_size: 100,
            epoch_year: 2006,
        }
    }

    pub fn linkedin() -> Self {
        Self {
            enabled: true,
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: "https://www.linkedin.com/oauth/v2/authorization".into(),
            token_url: "https://www.linkedin.com/oauth/v2/accessToken".into(),
            pkce: false,
            basic_auth: false,
            scope: "r_basicprofile".into(),
            api_base: "https://api.linkedin.com/v1".into(),
            aux_base: None,
            min_items: 1,
            max_page_size: 1,
            epoch_year: 2003,
        }
    }

    /// The mailbox gateway is a separate service; off until it is configured.
    pub fn imap() -> Self {
        Self {
            enabled: false,
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: String::new(),
            token_url: String::new(),
            pkce: false,
            basic_auth: false,
            scope: String::new(),
            api_base: String::new(),
            aux_base: None,
            min_items: 100,
            max_page_size: 100,
            epoch_year: 2000,
        }
    }

    fn merged(mut self, section: Option<ProviderSection>) -> Self {
        let Some(s) = section else {
            return self;
        };
        if let Some(v) = s.enabled {
            self.enabled = v;
        }
        if let Some(v) = s.client_id {
            self.client_id = v;
        }
        if let Some(v) = s.client_secret {
            self.client_secret = v;
        }
        if let Some(v) = s.authorize_url {
            self.authorize_url = v;
        }
        if let Some(v) = s.token_url {
            self.token_url = v;
        }
        if let Some(v) = s.pkce {
            self.pkce = v;
        }
        if let Some(v) = s.basic_auth {
            self.basic_auth = v;
        }
        if let Some(v) = s.scope {
            self.scope = v;
        }
        if let Some(v) = s.api_base {
            self.api_base = v;
        }
        if s.aux_base.is_some() {
            self.aux_base = s.aux_base;
        }
        if let Some(v) = s.min_items {
            self.min_items = v;
        }
        if let Some(v) = s.max_page_size {
            self.max_page_size = v;
        }
        if let Some(v) = s.epoch_year {
            self.epoch_year = v;
        }
        self
    }

    fn sanitize(&mut self) {
        self.client_id = self.client_id.trim().to_string();
        self.client_secret = self.client_secret.trim().to_string();
        self.token_url = self.token_url.trim().to_string();
        self.api_base = self.api_base.trim().trim_end_matches('/').to_string();
        if let Some(aux) = self.aux_base.as_mut() {
            *aux = aux.trim().trim_end_matches('/').to_string();
        }
        self.min_items = self.min_items.max(1);
        self.max_page_size = self.max_page_size.clamp(1, 500);
        self.epoch_year = self.epoch_year.clamp(1970, 9999);
    }

    /// Login URL opened in the popup, before the per-attempt `state`.
    /// `redirect_uri` is our callback route.
    pub fn login_url(&self, redirect_uri: &str) -> String {
        let mut params: Vec<(&str, String)> = Vec::new();
        if !self.client_id.is_empty() {
            params.push(("client_id", self.client_id.clone()));
            params.push(("response_type", "code".to_string()));
        }
        params.push(("redirect_uri", redirect_uri.to_string()));
        if !self.scope.is_empty() {
            params.push(("scope", self.scope.clone()));
        }
        append_query(&self.authorize_url, &params)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawProviders {
    facebook: Option<ProviderSection>,
    gmail: Option<ProviderSection>,
    twitter: Option<ProviderSection>,
    linkedin: Option<ProviderSection>,
    imap: Option<ProviderSection>,
}

impl RawProviders {
    pub(crate) fn resolve(self) -> ProvidersConfig {
        ProvidersConfig {
            facebook: ProviderConfig::facebook().merged(self.facebook),
            gmail: ProviderConfig::gmail().merged(self.gmail),
            twitter: ProviderConfig::twitter().merged(self.twitter),
            linkedin: ProviderConfig::linkedin().merged(self.linkedin),
            imap: ProviderConfig::imap().merged(self.imap),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvidersConfig {
    pub facebook: ProviderConfig,
    pub gmail: ProviderConfig,
    pub twitter: ProviderConfig,
    pub linkedin: ProviderConfig,
    pub imap: ProviderConfig,
}

impl ProvidersConfig {
    fn all_mut(&mut self) -> [(&'static str, &mut ProviderConfig); 5] {
        [
            ("FACEBOOK", &mut self.facebook),
            ("GMAIL", &mut self.gmail),
            ("TWITTER", &mut self.twitter),
            ("LINKEDIN", &mut self.linkedin),
            ("IMAP", &mut self.imap),
        ]
    }

    pub(crate) fn sanitize(&mut self) {
        for (_, p) in self.all_mut() {
            p.sanitize();
        }
        // The gateway serves its login page next to its API.
        if self.imap.authorize_url.is_empty() && !self.imap.api_base.is_empty() {
            self.imap.authorize_url = format!("{}/imap/login", self.imap.api_base);
        }
    }

    /// `GROCERY_<PROVIDER>_CLIENT_ID` and `GROCERY_<PROVIDER>_CLIENT_SECRET`
    /// override the configured client credentials.
    pub(crate) fn apply_env(&mut self) {
        for (key, p) in self.all_mut() {
            if let Ok(id) = env::var(format!("GROCERY_{key}_CLIENT_ID")) {
                p.client_id = id;
            }
            if let Ok(secret) = env::var(format!("GROCERY_{key}_CLIENT_SECRET")) {
                p.client_secret = secret;
            }
        }
    }
}
