// src/session/mod.rs
//! Per-provider session state: token bundles, the session store and the
//! authorization status taxonomy surfaced to the UI.
//!
//! A store belongs to one browser client; see [`crate::client`].

pub mod authorizer;
pub mod popup;

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use authorizer::{AuthAttempt, AuthBegin, AuthTiming, Authorizer, PendingAuth, Settled};
pub use popup::{PopupController, PopupHandle, PopupRegistry};

/// Opaque credentials for one provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionToken {
    OAuth2 { access_token: String },
    /// Session on the mailbox gateway after a successful IMAP login.
    Mailbox {
        user: String,
        host: String,
        session: String,
    },
}

impl SessionToken {
    /// Credential sent as `Authorization: Bearer …` to the provider.
    pub fn bearer(&self) -> &str {
        match self {
            SessionToken::OAuth2 { access_token } => access_token,
            SessionToken::Mailbox { session, .. } => session,
        }
    }
}

// Never print secrets.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionToken::OAuth2 { .. } => f.write_str("OAuth2(..)"),
            SessionToken::Mailbox { user, host, .. } => {
                write!(f, "Mailbox({}@{host})", anon_hash(user))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub token: SessionToken,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    pub fn new(token: SessionToken) -> Self {
        Self {
            token,
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Session indicators for every provider. Only the authorizer writes here.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: RwLock<HashMap<String, StoredSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, provider: &str, session: StoredSession) {
        let mut map = self.inner.write().expect("session store poisoned");
        map.insert(provider.to_string(), session);
    }

    /// Session for `provider` if present and not expired at `now`.
    pub fn get_valid(&self, provider: &str, now: DateTime<Utc>) -> Option<StoredSession> {
        let map = self.inner.read().expect("session store poisoned");
        map.get(provider).filter(|s| s.is_valid_at(now)).cloned()
    }

    pub fn is_valid(&self, provider: &str, now: DateTime<Utc>) -> bool {
        self.get_valid(provider, now).is_some()
    }

    /// Returns `true` when a session was removed.
    pub fn clear(&self, provider: &str) -> bool {
        let mut map = self.inner.write().expect("session store poisoned");
        map.remove(provider).is_some()
    }
}

/// Outcome of an authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Connected,
    /// Never logged in (also: popup closed without an answer).
    Unknown,
    /// Explicit denial by the user or provider.
    NotAuthorized,
    /// Transport or protocol failure, and anything unrecognised.
    Error,
}

impl AuthStatus {
    /// Parse the status string posted by a callback page.
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "connected" => AuthStatus::Connected,
            "unknown" => AuthStatus::Unknown,
            "not_authorized" | "denied" => AuthStatus::NotAuthorized,
            _ => AuthStatus::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Connected => "connected",
            AuthStatus::Unknown => "unknown",
            AuthStatus::NotAuthorized => "not_authorized",
            AuthStatus::Error => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, AuthStatus::Connected)
    }

    /// Message returned by `authorize()`.
    pub fn message(&self) -> &'static str {
        match self {
            AuthStatus::Connected => "Authorization granted",
            AuthStatus::Unknown => "User not logged in",
            AuthStatus::NotAuthorized => "Authorization denied",
            AuthStatus::Error => "Authorization error",
        }
    }

    /// Error attached to a fetch that could not authorize.
    pub fn fetch_error(&self, provider: &str) -> String {
        match self {
            AuthStatus::Unknown => format!("User not logged into {provider}"),
            AuthStatus::NotAuthorized => "Authorization denied".to_string(),
            _ => "Authorization error".to_string(),
        }
    }

    /// `(authorized, message)` carried by the `auth` event.
    pub fn event_detail(&self) -> (bool, &'static str) {
        match self {
            AuthStatus::Connected => (true, "Authorization granted"),
            AuthStatus::NotAuthorized => (false, "Not authorized"),
            _ => (false, "Not connected"),
        }
    }

    pub fn into_info(self) -> AuthInfo {
        AuthInfo {
            success: self.is_connected(),
            message: self.message().to_string(),
        }
    }
}

/// Result of `authorize()` as seen by the UI driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthInfo {
    pub success: bool,
    pub message: String,
}

/// Explicit outcome delivered by a provider callback.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub status: AuthStatus,
    pub session: Option<StoredSession>,
}

impl AuthOutcome {
    pub fn connected(session: StoredSession) -> Self {
        Self {
            status: AuthStatus::Connected,
            session: Some(session),
        }
    }

    pub fn failed(status: AuthStatus) -> Self {
        Self {
            status,
            session: None,
        }
    }
}

/// Marker error: the provider rejected the stored credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionExpired;

impl fmt::Display for SessionExpired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("session expired or revoked")
    }
}

impl std::error::Error for SessionExpired {}

/// Short anonymized id for logging account identifiers.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expired_sessions_are_not_valid() {
        let store = SessionStore::new();
        let now = Utc::now();
        let token = SessionToken::OAuth2 {
            access_token: "t".into(),
        };
        store.put("Gmail", StoredSession::new(token.clone()).expiring_at(now - Duration::seconds(1)));
        assert!(!store.is_valid("Gmail", now));
        store.put("Gmail", StoredSession::new(token).expiring_at(now + Duration::hours(1)));
        assert!(store.is_valid("Gmail", now));
        assert!(store.clear("Gmail"));
        assert!(!store.clear("Gmail"));
    }

    #[test]
    fn status_messages_follow_taxonomy() {
        assert_eq!(AuthStatus::from_wire("connected").message(), "Authorization granted");
        assert_eq!(AuthStatus::from_wire("unknown").message(), "User not logged in");
        assert_eq!(AuthStatus::from_wire("not_authorized").message(), "Authorization denied");
        assert_eq!(AuthStatus::from_wire("weird").message(), "Authorization error");
        assert_eq!(
            AuthStatus::Unknown.fetch_error("Facebook"),
            "User not logged into Facebook"
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let t = SessionToken::OAuth2 {
            access_token: "sekrit".into(),
        };
        assert!(!format!("{t:?}").contains("sekrit"));
        let m = SessionToken::Mailbox {
            user: "ada@example.test".into(),
            host: "imap.example.test".into(),
            session: "sekrit".into(),
        };
        let shown = format!("{m:?}");
        assert!(!shown.contains("sekrit") && !shown.contains("ada@"));
    }
}
