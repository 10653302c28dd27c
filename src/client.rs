// src/client.rs
//! Browser clients. Every browser gets a random id in a signed cookie and
//! its own provider registry, so sessions, pending logins and cached min
//! dates never leak between clients.
//!
//! Cookie value: `id|expiry|signature`, the signature being hex
//! HMAC-SHA256 over `id|expiry`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use metrics::gauge;
use sha2::Sha256;
use tracing::{debug, info};

use crate::registry::{ProviderCatalog, ProviderRegistry, RegistryContext};
use crate::session::{anon_hash, AuthTiming, PopupController, SessionStore};

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "gp_client";
const COOKIE_MAX_AGE_SECS: i64 = 30 * 24 * 3600;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(hex::encode(rand::random::<[u8; 16]>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Ids are bearer secrets; logs get a hash.
impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", anon_hash(&self.0))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&anon_hash(&self.0))
    }
}

#[derive(Clone)]
pub struct CookieSigner {
    secret: Vec<u8>,
    secure: bool,
}

impl CookieSigner {
    /// `secure` adds the `Secure` attribute (the app is served over HTTPS).
    pub fn new(secret: impl AsRef<[u8]>, secure: bool) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            secure,
        }
    }

    /// Throwaway key: cookies die with the process.
    pub fn ephemeral(secure: bool) -> Self {
        Self::new(rand::random::<[u8; 32]>(), secure)
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn issue(&self, id: &ClientId, now: DateTime<Utc>) -> String {
        let expiry = now.timestamp() + COOKIE_MAX_AGE_SECS;
        let payload = format!("{}|{expiry}", id.as_str());
        let sig = self.sign(&payload);
        format!("{payload}|{sig}")
    }

    /// Client id carried by a cookie value, if the signature holds and it
    /// has not expired at `now`.
    pub fn verify(&self, value: &str, now: DateTime<Utc>) -> Option<ClientId> {
        let mut parts = value.splitn(3, '|');
        let (id, expiry, sig) = (parts.next()?, parts.next()?, parts.next()?);
        if id.is_empty() {
            return None;
        }
        let expected = self.sign(&format!("{id}|{expiry}"));
        if !constant_time_eq(sig.as_bytes(), expected.as_bytes()) {
            return None;
        }
        let expiry: i64 = expiry.parse().ok()?;
        if now.timestamp() > expiry {
            return None;
        }
        Some(ClientId(id.to_string()))
    }

    /// `Set-Cookie` header value for `id`.
    pub fn set_cookie(&self, id: &ClientId, now: DateTime<Utc>) -> String {
        let value = self.issue(id, now);
        let secure = if self.secure { "; Secure" } else { "" };
        format!("{COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={COOKIE_MAX_AGE_SECS}{secure}")
    }
}

impl fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieSigner")
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Value of cookie `name` in a `Cookie` header.
pub fn parse_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(name)?.strip_prefix('='))
}

struct ClientEntry {
    registry: Arc<ProviderRegistry>,
    last_seen: Instant,
}

/// One provider registry per client, built from the shared catalog.
pub struct ClientRegistries {
    catalog: Arc<ProviderCatalog>,
    popups: Arc<dyn PopupController>,
    timing: AuthTiming,
    idle: Duration,
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
}

impl ClientRegistries {
    /// Clients unseen for `idle` are forgotten, sessions included.
    pub fn new(
        catalog: Arc<ProviderCatalog>,
        popups: Arc<dyn PopupController>,
        timing: AuthTiming,
        idle: Duration,
    ) -> Self {
        Self {
            catalog,
            popups,
            timing,
            idle,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Registry of `client`, created on first use.
    pub fn registry_for(&self, client: &ClientId) -> Result<Arc<ProviderRegistry>> {
        let now = Instant::now();
        let mut clients = self.clients.lock().expect("client table poisoned");

        let before = clients.len();
        let idle = self.idle;
        clients.retain(|id, e| id == client || now.duration_since(e.last_seen) < idle);
        if clients.len() < before {
            debug!(target: "client", dropped = before - clients.len(), "idle clients dropped");
        }

        if let Some(entry) = clients.get_mut(client) {
            entry.last_seen = now;
            return Ok(Arc::clone(&entry.registry));
        }

        let ctx = RegistryContext::new(
            Arc::new(SessionStore::new()),
            Arc::clone(&self.popups),
            self.timing,
        );
        let registry = Arc::new(
            self.catalog
                .instantiate(&ctx)
                .context("building client registry")?,
        );
        clients.insert(
            client.clone(),
            ClientEntry {
                registry: Arc::clone(&registry),
                last_seen: now,
            },
        );
        gauge!("clients_active").set(clients.len() as f64);
        info!(target: "client", %client, "client registry created");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().expect("client table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn cookie_verifies_with_its_own_key_only() {
        let signer = CookieSigner::new("k1", false);
        let id = ClientId::generate();
        let now = Utc::now();
        let value = signer.issue(&id, now);
        assert_eq!(signer.verify(&value, now), Some(id.clone()));
        assert_eq!(CookieSigner::new("k2", false).verify(&value, now), None);

        let other = ClientId::generate();
        let forged = value.replacen(id.as_str(), other.as_str(), 1);
        assert_eq!(signer.verify(&forged, now), None);

        let later = now + ChronoDuration::seconds(COOKIE_MAX_AGE_SECS + 1);
        assert_eq!(signer.verify(&value, later), None);
        assert_eq!(signer.verify("garbage", now), None);
    }

    #[test]
    fn set_cookie_attributes() {
        let id = ClientId::generate();
        let plain = CookieSigner::new("k", false).set_cookie(&id, Utc::now());
        assert!(plain.starts_with("gp_client="));
        assert!(plain.contains("; HttpOnly; SameSite=Lax"));
        assert!(!plain.contains("Secure"));
        assert!(CookieSigner::new("k", true)
            .set_cookie(&id, Utc::now())
            .ends_with("; Secure"));
    }

    #[test]
    fn finds_cookie_among_others() {
        assert_eq!(parse_cookie("a=1; gp_client=abc|1|ff", COOKIE_NAME), Some("abc|1|ff"));
        assert_eq!(parse_cookie("gp_client_old=x; gp_client=y", COOKIE_NAME), Some("y"));
        assert_eq!(parse_cookie("a=1", COOKIE_NAME), None);
    }

    #[test]
    fn client_ids_stay_out_of_logs() {
        let id = ClientId::generate();
        assert!(!format!("{id:?}").contains(id.as_str()));
        assert!(!id.to_string().contains(id.as_str()));
    }
}
