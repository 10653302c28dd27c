// src/session/authorizer.rs
//! Session authorizer: makes sure a provider has a valid session before any
//! data call, driving the popup login flow when it does not.
//!
//! An attempt resolves exactly once, on whichever comes first:
//! - the login redirect, matched to the attempt by its `state`
//!   (`complete_login`), or an explicit `deliver`,
//! - the popup being closed (polled, then a short grace delay so an outcome
//!   posted while the window closes still wins),
//! - the overall timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{AuthInfo, AuthOutcome, AuthStatus, PopupController, PopupHandle, SessionStore, StoredSession};
use crate::client::constant_time_eq;
use crate::events::{EventBus, ProviderEvent};
use crate::oauth::{LoginFlow, LoginReply};

#[derive(Debug, Clone, Copy)]
pub struct AuthTiming {
    pub poll_interval: Duration,
    pub close_grace: Duration,
    pub timeout: Duration,
}

impl Default for AuthTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            close_grace: Duration::from_millis(100),
            timeout: Duration::from_secs(300),
        }
    }
}

/// One logical authorization attempt. Clones share the same completion.
#[derive(Clone)]
pub struct AuthAttempt {
    inner: Arc<AttemptInner>,
}

struct AttemptInner {
    id: u64,
    fired: AtomicBool,
    tx: watch::Sender<Option<AuthStatus>>,
}

impl AuthAttempt {
    fn new(id: u64) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(AttemptInner {
                id,
                fired: AtomicBool::new(false),
                tx,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Resolve the attempt. Only the first call wins; later ones return `false`.
    pub fn complete(&self, status: AuthStatus) -> bool {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.tx.send_replace(Some(status));
        true
    }

    pub fn is_done(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) -> AuthStatus {
        let mut rx = self.inner.tx.subscribe();
        // The borrow guard must drop before `rx` does.
        let status = match rx.wait_for(Option::is_some).await {
            Ok(v) => (*v).clone().unwrap_or(AuthStatus::Error),
            Err(_) => AuthStatus::Error,
        };
        status
    }
}

impl std::fmt::Debug for AuthAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthAttempt")
            .field("id", &self.inner.id)
            .field("done", &self.is_done())
            .finish()
    }
}

/// An attempt waiting for the user. Only a callback echoing `state` may
/// resolve it.
#[derive(Clone)]
pub struct PendingAuth {
    pub attempt: AuthAttempt,
    pub popup: PopupHandle,
    pub login_url: String,
    pub state: String,
    /// PKCE verifier, sent along with the code exchange.
    pub verifier: Option<String>,
}

impl PendingAuth {
    pub fn matches(&self, state: &str) -> bool {
        constant_time_eq(self.state.as_bytes(), state.as_bytes())
    }
}

impl std::fmt::Debug for PendingAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuth")
            .field("attempt", &self.attempt)
            .field("popup", &self.popup)
            .finish_non_exhaustive()
    }
}

/// What a delivered outcome amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub status: AuthStatus,
    /// It resolved the pending attempt (rather than arriving too late).
    pub delivered: bool,
}

#[derive(Debug)]
pub enum AuthBegin {
    /// Nothing to wait for: already connected, or the popup could not open.
    Resolved(AuthStatus),
    Pending(PendingAuth),
}

pub struct Authorizer {
    provider: String,
    login: LoginFlow,
    store: Arc<SessionStore>,
    popups: Arc<dyn PopupController>,
    events: Arc<EventBus>,
    timing: AuthTiming,
    pending: Mutex<Option<PendingAuth>>,
    next_attempt: AtomicU64,
}

impl Authorizer {
    pub fn new(
        provider: impl Into<String>,
        login: LoginFlow,
        store: Arc<SessionStore>,
        popups: Arc<dyn PopupController>,
        events: Arc<EventBus>,
        timing: AuthTiming,
    ) -> Self {
        Self {
            provider: provider.into(),
            login,
            store,
            popups,
            events,
            timing,
            pending: Mutex::new(None),
            next_attempt: AtomicU64::new(1),
        }
    }

    pub fn login_flow(&self) -> &LoginFlow {
        &self.login
    }

    /// Cheap local check: a stored, unexpired session exists.
    pub fn is_authorized(&self) -> bool {
        self.store.is_valid(&self.provider, Utc::now())
    }

    pub fn session(&self) -> Option<StoredSession> {
        self.store.get_valid(&self.provider, Utc::now())
    }

    /// Start (or join) an authorization attempt without waiting for it.
    pub fn begin(&self) -> AuthBegin {
        if self.is_authorized() {
            return AuthBegin::Resolved(AuthStatus::Connected);
        }

        let mut pending = self.pending.lock().expect("pending auth poisoned");
        if let Some(existing) = pending.as_ref() {
            if !existing.attempt.is_done() {
                debug!(target: "auth", provider = %self.provider, attempt = existing.attempt.id(), "joining in-flight authorization");
                return AuthBegin::Pending(existing.clone());
            }
        }

        let request = self.login.start();
        let popup = match self.popups.open(&request.url) {
            Ok(h) => h,
            Err(e) => {
                warn!(target: "auth", provider = %self.provider, error = ?e, "cannot open login window");
                counter!("auth_outcomes_total", "provider" => self.provider.clone(), "status" => "error").increment(1);
                return AuthBegin::Resolved(AuthStatus::Error);
            }
        };

        let attempt = AuthAttempt::new(self.next_attempt.fetch_add(1, Ordering::Relaxed));
        counter!("auth_attempts_total", "provider" => self.provider.clone()).increment(1);
        info!(target: "auth", provider = %self.provider, attempt = attempt.id(), "authorization started");

        self.spawn_popup_watch(attempt.clone(), popup.clone());

        let p = PendingAuth {
            attempt,
            popup,
            login_url: request.url,
            state: request.state,
            verifier: request.verifier,
        };
        *pending = Some(p.clone());
        AuthBegin::Pending(p)
    }

    fn spawn_popup_watch(&self, attempt: AuthAttempt, popup: PopupHandle) {
        let popups = Arc::clone(&self.popups);
        let timing = self.timing;
        let provider = self.provider.clone();

        tokio::spawn(async move {
            let deadline = tokio::time::sleep(timing.timeout);
            tokio::pin!(deadline);
            let mut ticker = tokio::time::interval(timing.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        if attempt.complete(AuthStatus::Unknown) {
                            warn!(target: "auth", %provider, attempt = attempt.id(), "authorization timed out");
                        }
                        return;
                    }
                    _ = ticker.tick() => {
                        if attempt.is_done() {
                            return;
                        }
                        if popups.is_closed(&popup) {
                            break;
                        }
                    }
                }
            }

            tokio::time::sleep(timing.close_grace).await;
            if attempt.complete(AuthStatus::Unknown) {
                debug!(target: "auth", %provider, attempt = attempt.id(), "login window closed without outcome");
            }
        });
    }

    /// Wait for a pending attempt and clean it up.
    pub async fn wait(&self, pending: &PendingAuth) -> AuthStatus {
        let status = pending.attempt.wait().await;
        {
            let mut slot = self.pending.lock().expect("pending auth poisoned");
            if slot
                .as_ref()
                .is_some_and(|p| p.attempt.id() == pending.attempt.id())
            {
                *slot = None;
            }
        }
        self.popups.release(&pending.popup);
        status
    }

    /// Ensure a session exists, opening the login flow if needed.
    pub async fn ensure(&self) -> AuthStatus {
        match self.begin() {
            AuthBegin::Resolved(status) => status,
            AuthBegin::Pending(p) => self.wait(&p).await,
        }
    }

    pub async fn authorize(&self) -> AuthInfo {
        self.ensure().await.into_info()
    }

    /// The unresolved attempt started with `state`, if any.
    pub fn pending_for(&self, state: &str) -> Option<PendingAuth> {
        let pending = self.pending.lock().expect("pending auth poisoned");
        pending
            .as_ref()
            .filter(|p| !p.attempt.is_done() && p.matches(state))
            .cloned()
    }

    /// Finish the login whose redirect echoed `state`: exchange the code if
    /// there is one, store the session and resolve the attempt. `None` when
    /// no pending attempt carries `state`; nothing is touched then.
    pub async fn complete_login(&self, state: &str, reply: LoginReply) -> Option<Settled> {
        let Some(pending) = self.pending_for(state) else {
            warn!(target: "auth", provider = %self.provider, "callback state matches no pending attempt");
            counter!("auth_callbacks_rejected_total", "provider" => self.provider.clone()).increment(1);
            return None;
        };
        let outcome = self.login.finish(reply, pending.verifier.as_deref()).await;
        Some(self.settle(outcome, Some(pending)))
    }

    /// Explicit outcome for whichever attempt is pending. Returns `true`
    /// when it resolved the pending attempt, `false` when there was none or
    /// it had already resolved.
    pub fn deliver(&self, outcome: AuthOutcome) -> bool {
        let pending = self
            .pending
            .lock()
            .expect("pending auth poisoned")
            .clone();
        self.settle(outcome, pending).delivered
    }

    fn settle(&self, outcome: AuthOutcome, pending: Option<PendingAuth>) -> Settled {
        let status = match (outcome.status, outcome.session) {
            (AuthStatus::Connected, Some(session)) => {
                self.store.put(&self.provider, session);
                AuthStatus::Connected
            }
            (AuthStatus::Connected, None) => {
                warn!(target: "auth", provider = %self.provider, "connected callback without credentials");
                AuthStatus::Error
            }
            (status, _) => status,
        };

        counter!("auth_outcomes_total", "provider" => self.provider.clone(), "status" => status.as_str()).increment(1);
        let (authorized, message) = status.event_detail();
        self.events
            .dispatch_event(ProviderEvent::auth(authorized, message));

        let delivered = match pending.as_ref() {
            Some(p) => p.attempt.complete(status.clone()),
            None => false,
        };
        Settled { status, delivered }
    }

    /// Forget the session and tell listeners.
    pub fn disconnect(&self) -> bool {
        let removed = self.store.clear(&self.provider);
        self.events
            .dispatch_event(ProviderEvent::auth(false, "Logout"));
        removed
    }

    /// The provider rejected the stored credentials.
    pub fn invalidate(&self) {
        if self.store.clear(&self.provider) {
            warn!(target: "auth", provider = %self.provider, "lost authorization");
            self.events
                .dispatch_event(ProviderEvent::auth(false, "Not connected"));
        }
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("provider", &self.provider)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attempt_completes_once() {
        let a = AuthAttempt::new(7);
        assert!(a.complete(AuthStatus::NotAuthorized));
        assert!(!a.complete(AuthStatus::Connected));
        assert_eq!(a.wait().await, AuthStatus::NotAuthorized);
        assert_eq!(a.clone().wait().await, AuthStatus::NotAuthorized);
    }
}
