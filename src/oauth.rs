// src/oauth.rs
//! Login flows: the URL a login popup opens, and how the redirect coming
//! back from it becomes a session.
//!
//! OAuth vendors use the authorization-code grant. Every attempt carries its
//! own `state` (and a PKCE challenge when the vendor asks for one), and the
//! code is exchanged for a token server side. Gateways that do the login
//! themselves (the IMAP bridge) hand credentials back directly instead.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::providers::vendor_error_message;
use crate::session::{AuthOutcome, AuthStatus, SessionToken, StoredSession};

/// URL-safe token from `N` random bytes.
fn random_token<const N: usize>() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; N]>())
}

/// S256 challenge for a PKCE verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Turns an authorization code into a session.
#[async_trait]
pub trait CodeExchange: Send + Sync {
    async fn exchange(&self, code: &str, verifier: Option<&str>) -> Result<StoredSession>;
}

/// One started login: where to send the popup and what to expect back.
#[derive(Clone)]
pub struct LoginRequest {
    pub url: String,
    pub state: String,
    pub verifier: Option<String>,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// What the login redirect brought back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginReply {
    /// Explicit status (or an OAuth `error`) without credentials.
    Status(AuthStatus),
    Code(String),
    /// Credentials handed back by a gateway that logged in itself.
    Credentials {
        token: SessionToken,
        expires_in: Option<i64>,
    },
    Empty,
}

#[derive(Clone)]
pub struct LoginFlow {
    url: String,
    pkce: bool,
    exchange: Option<Arc<dyn CodeExchange>>,
}

impl LoginFlow {
    /// Login page that answers with credentials directly.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pkce: false,
            exchange: None,
        }
    }

    pub fn with_pkce(mut self) -> Self {
        self.pkce = true;
        self
    }

    /// Answers must then carry a `code`; bare credentials are refused.
    pub fn with_exchange(mut self, exchange: Arc<dyn CodeExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.url
    }

    pub fn exchanges_code(&self) -> bool {
        self.exchange.is_some()
    }

    /// Fresh `state` (and PKCE verifier) appended to the login URL.
    pub fn start(&self) -> LoginRequest {
        let state = random_token::<16>();
        let mut params = vec![("state", state.clone())];
        let verifier = self.pkce.then(random_token::<32>);
        if let Some(v) = verifier.as_deref() {
            params.push(("code_challenge", pkce_challenge(v)));
            params.push(("code_challenge_method", "S256".to_string()));
        }
        LoginRequest {
            url: append_query(&self.url, &params),
            state,
            verifier,
        }
    }

    /// Map a reply to the outcome delivered to the waiting attempt.
    pub async fn finish(&self, reply: LoginReply, verifier: Option<&str>) -> AuthOutcome {
        match reply {
            LoginReply::Status(status) => AuthOutcome::failed(status),
            LoginReply::Empty => AuthOutcome::failed(AuthStatus::Unknown),
            LoginReply::Code(code) => {
                let Some(exchange) = self.exchange.as_ref() else {
                    warn!(target: "oauth", "authorization code received but no token endpoint is configured");
                    return AuthOutcome::failed(AuthStatus::Error);
                };
                match exchange.exchange(&code, verifier).await {
                    Ok(session) => AuthOutcome::connected(session),
                    Err(e) => {
                        warn!(target: "oauth", error = ?e, "code exchange failed");
                        AuthOutcome::failed(AuthStatus::Error)
                    }
                }
            }
            LoginReply::Credentials { token, expires_in } => {
                if self.exchanges_code() {
                    warn!(target: "oauth", "bare credentials refused on a code flow");
                    return AuthOutcome::failed(AuthStatus::Error);
                }
                AuthOutcome::connected(session_with_expiry(token, expires_in))
            }
        }
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow")
            .field("url", &self.url)
            .field("pkce", &self.pkce)
            .field("exchange", &self.exchange.is_some())
            .finish()
    }
}

fn session_with_expiry(token: SessionToken, expires_in: Option<i64>) -> StoredSession {
    let session = StoredSession::new(token);
    match expires_in.filter(|s| *s > 0) {
        Some(secs) => session.expiring_at(Utc::now() + chrono::Duration::seconds(secs)),
        None => session,
    }
}

pub(crate) fn append_query(url: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}{query}")
}

pub(crate) fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error_description: Option<String>,
}

/// Token endpoint client for one vendor.
#[derive(Clone)]
pub struct OAuthClient {
    provider: &'static str,
    client_id: String,
    client_secret: String,
    token_url: String,
    redirect_uri: String,
    basic_auth: bool,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(
        provider: &'static str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
        redirect_uri: impl Into<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .with_context(|| format!("building {provider} token client"))?;
        Ok(Self {
            provider,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            redirect_uri: redirect_uri.into(),
            basic_auth: false,
            http,
        })
    }

    /// Send the client credentials as HTTP Basic instead of form fields.
    pub fn with_basic_auth(mut self, on: bool) -> Self {
        self.basic_auth = on;
        self
    }

    fn form<'a>(&'a self, code: &'a str, verifier: Option<&'a str>) -> Vec<(&'static str, &'a str)> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        if !self.basic_auth && !self.client_secret.is_empty() {
            form.push(("client_secret", self.client_secret.as_str()));
        }
        if let Some(v) = verifier {
            form.push(("code_verifier", v));
        }
        form
    }
}

#[async_trait]
impl CodeExchange for OAuthClient {
    async fn exchange(&self, code: &str, verifier: Option<&str>) -> Result<StoredSession> {
        let mut req = self.http.post(&self.token_url).form(&self.form(code, verifier));
        if self.basic_auth {
            req = req.basic_auth(&self.client_id, Some(&self.client_secret));
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                counter!("token_exchanges_total", "provider" => self.provider, "outcome" => "error").increment(1);
                return Err(e).with_context(|| format!("{} token request failed", self.provider));
            }
        };
        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("{} token .text()", self.provider))?;

        if !status.is_success() {
            counter!("token_exchanges_total", "provider" => self.provider, "outcome" => "rejected").increment(1);
            let described = serde_json::from_str::<TokenError>(&body)
                .ok()
                .and_then(|e| e.error_description);
            match described.or_else(|| vendor_error_message(&body)) {
                Some(msg) => bail!("{} token endpoint: {msg}", self.provider),
                None => bail!("{} token endpoint returned HTTP {}", self.provider, status.as_u16()),
            }
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .with_context(|| format!("parsing {} token response", self.provider))?;
        counter!("token_exchanges_total", "provider" => self.provider, "outcome" => "ok").increment(1);
        info!(target: "oauth", provider = self.provider, expires_in = ?token.expires_in, "code exchanged");
        Ok(session_with_expiry(
            SessionToken::OAuth2 {
                access_token: token.access_token,
            },
            token.expires_in,
        ))
    }
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("provider", &self.provider)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorded {
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl CodeExchange for Recorded {
        async fn exchange(&self, code: &str, verifier: Option<&str>) -> Result<StoredSession> {
            self.seen
                .lock()
                .unwrap()
                .push((code.to_string(), verifier.map(str::to_string)));
            if code == "bad" {
                bail!("invalid_grant");
            }
            Ok(StoredSession::new(SessionToken::OAuth2 {
                access_token: format!("at-{code}"),
            }))
        }
    }

    fn query_param(url: &str, key: &str) -> Option<String> {
        let query = url.split_once('?')?.1;
        query
            .split('&')
            .find_map(|kv| kv.strip_prefix(key)?.strip_prefix('='))
            .map(str::to_string)
    }

    #[test]
    fn pkce_challenge_matches_rfc7636_example() {
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mJ92IZ9sNQ9sWLv1mI4aTl3-lTiHM0"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn every_start_gets_its_own_state() {
        let flow = LoginFlow::new("https://vendor.example.test/auth?client_id=1").with_pkce();
        let a = flow.start();
        let b = flow.start();
        assert_ne!(a.state, b.state);
        assert_eq!(query_param(&a.url, "state").as_deref(), Some(a.state.as_str()));
        assert!(a.url.starts_with("https://vendor.example.test/auth?client_id=1&state="));

        let verifier = a.verifier.expect("pkce verifier");
        assert_eq!(verifier.len(), 43);
        assert_eq!(query_param(&a.url, "code_challenge"), Some(pkce_challenge(&verifier)));
        assert_eq!(query_param(&a.url, "code_challenge_method").as_deref(), Some("S256"));

        let plain = LoginFlow::new("https://gw.example.test/login").start();
        assert!(plain.verifier.is_none());
        assert!(query_param(&plain.url, "code_challenge").is_none());
    }

    #[tokio::test]
    async fn code_is_exchanged_with_the_verifier() {
        let recorded = Arc::new(Recorded {
            seen: Mutex::new(Vec::new()),
        });
        let flow = LoginFlow::new("https://vendor.example.test/auth")
            .with_exchange(Arc::clone(&recorded) as Arc<dyn CodeExchange>);

        let ok = flow.finish(LoginReply::Code("c1".into()), Some("v1")).await;
        assert_eq!(ok.status, AuthStatus::Connected);
        assert_eq!(ok.session.unwrap().token.bearer(), "at-c1");

        let failed = flow.finish(LoginReply::Code("bad".into()), None).await;
        assert_eq!(failed.status, AuthStatus::Error);
        assert_eq!(
            *recorded.seen.lock().unwrap(),
            vec![("c1".to_string(), Some("v1".to_string())), ("bad".to_string(), None)]
        );

        // A code flow never takes a token straight from the redirect.
        let forged = flow
            .finish(
                LoginReply::Credentials {
                    token: SessionToken::OAuth2 {
                        access_token: "forged".into(),
                    },
                    expires_in: None,
                },
                None,
            )
            .await;
        assert_eq!(forged.status, AuthStatus::Error);
        assert!(forged.session.is_none());
    }

    #[tokio::test]
    async fn gateway_credentials_and_statuses() {
        let flow = LoginFlow::new("https://gw.example.test/login");
        let out = flow
            .finish(
                LoginReply::Credentials {
                    token: SessionToken::Mailbox {
                        user: "ada".into(),
                        host: "imap.example.test".into(),
                        session: "s1".into(),
                    },
                    expires_in: Some(60),
                },
                None,
            )
            .await;
        assert_eq!(out.status, AuthStatus::Connected);
        assert!(out.session.unwrap().expires_at.is_some());

        let denied = flow.finish(LoginReply::Status(AuthStatus::NotAuthorized), None).await;
        assert_eq!(denied.status, AuthStatus::NotAuthorized);
        assert_eq!(flow.finish(LoginReply::Empty, None).await.status, AuthStatus::Unknown);
        assert_eq!(flow.finish(LoginReply::Code("c".into()), None).await.status, AuthStatus::Error);
    }

    #[test]
    fn token_form_carries_code_and_verifier() {
        let client = OAuthClient::new(
            "Twitter",
            "cid",
            "csecret",
            "https://api.example.test/2/oauth2/token",
            "http://localhost:8000/providers/twitter/callback",
            Duration::from_secs(5),
            "test",
        )
        .unwrap();
        let form = client.form("c1", Some("v1"));
        assert!(form.contains(&("grant_type", "authorization_code")));
        assert!(form.contains(&("client_secret", "csecret")));
        assert!(form.contains(&("code_verifier", "v1")));

        let basic = client.with_basic_auth(true);
        assert!(!basic.form("c1", None).iter().any(|(k, _)| *k == "client_secret"));
    }
}
