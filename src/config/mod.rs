// src/config/mod.rs
//! Application configuration.
//!
//! Lookup order:
//! 1) $GROCERY_CONFIG_PATH (must exist)
//! 2) config/grocery.toml
//! 3) built-in defaults

pub mod providers;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::session::AuthTiming;
pub use providers::{ProviderConfig, ProviderSection, ProvidersConfig};

const ENV_PATH: &str = "GROCERY_CONFIG_PATH";
const ENV_PUBLIC_BASE_URL: &str = "GROCERY_PUBLIC_BASE_URL";
const ENV_SESSION_SECRET: &str = "GROCERY_SESSION_SECRET";
const DEFAULT_PATH: &str = "config/grocery.toml";

fn default_public_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_request_timeout_secs() -> u64 {
    20
}
fn default_user_agent() -> String {
    concat!("grocery-portraits/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_client_idle_secs() -> u64 {
    24 * 3600
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_close_grace_ms() -> u64 {
    100
}
fn default_auth_timeout_secs() -> u64 {
    300
}
fn default_max_pages() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL the browser reaches us on; OAuth redirects point here.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Key signing the client cookie. Empty: a random key per process.
    #[serde(default, skip_serializing)]
    pub session_secret: String,
    /// Clients unseen this long are forgotten, sessions included.
    #[serde(default = "default_client_idle_secs")]
    pub client_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_base_url: default_public_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            session_secret: String::new(),
            client_idle_secs: default_client_idle_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    #[serde(default = "default_auth_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            close_grace_ms: default_close_grace_ms(),
            timeout_secs: default_auth_timeout_secs(),
        }
    }
}

impl AuthConfig {
    pub fn timing(&self) -> AuthTiming {
        AuthTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            close_grace: Duration::from_millis(self.close_grace_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Hard cap on pages per fetch.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    auth: AuthConfig,
    #[serde(default)]
    pagination: PaginationConfig,
    #[serde(default)]
    providers: providers::RawProviders,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub pagination: PaginationConfig,
    pub providers: ProvidersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let mut cfg = AppConfig {
            server: raw.server,
            auth: raw.auth,
            pagination: raw.pagination,
            providers: raw.providers.resolve(),
        };
        cfg.sanitize();
        cfg
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(s).context("parsing grocery config")?;
        Ok(raw.into())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&content)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Load using env var + fallbacks (see module docs).
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let p = PathBuf::from(DEFAULT_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        let mut cfg = Self::default();
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn client_idle(&self) -> Duration {
        Duration::from_secs(self.server.client_idle_secs)
    }

    /// Cookies get `Secure` when the public URL is HTTPS.
    pub fn secure_cookies(&self) -> bool {
        self.server.public_base_url.starts_with("https://")
    }

    /// OAuth redirect target for `provider`.
    pub fn callback_url(&self, provider: &str) -> String {
        format!(
            "{}/providers/{}/callback",
            self.server.public_base_url,
            provider.to_ascii_lowercase()
        )
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var(ENV_PUBLIC_BASE_URL) {
            if !url.trim().is_empty() {
                self.server.public_base_url = url.trim().to_string();
            }
        }
        if let Ok(secret) = env::var(ENV_SESSION_SECRET) {
            self.server.session_secret = secret;
        }
        self.providers.apply_env();
        self.sanitize();
    }

    fn sanitize(&mut self) {
        let base = self.server.public_base_url.trim().trim_end_matches('/');
        self.server.public_base_url = if base.is_empty() {
            default_public_base_url()
        } else {
            base.to_string()
        };
        if self.server.request_timeout_secs == 0 {
            self.server.request_timeout_secs = default_request_timeout_secs();
        }
        self.server.session_secret = self.server.session_secret.trim().to_string();
        if self.server.client_idle_secs == 0 {
            self.server.client_idle_secs = default_client_idle_secs();
        }
        if self.server.user_agent.trim().is_empty() {
            self.server.user_agent = default_user_agent();
        }
        if !(10..=5_000).contains(&self.auth.poll_interval_ms) {
            self.auth.poll_interval_ms = default_poll_interval_ms();
        }
        if self.auth.close_grace_ms > 5_000 {
            self.auth.close_grace_ms = default_close_grace_ms();
        }
        if self.auth.timeout_secs == 0 {
            self.auth.timeout_secs = default_auth_timeout_secs();
        }
        self.pagination.max_pages = self.pagination.max_pages.clamp(1, 100);
        self.providers.sanitize();
    }
}
