// src/events.rs
//! Provider event bus: `loaded` and `auth` notifications for the UI driver.
//!
//! Listeners are invoked synchronously in registration order. A listener
//! that panics is logged and skipped; delivery continues with the next one.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use metrics::counter;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Loaded,
    Auth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventDetail {
    /// Remote API/transport is ready.
    Loaded { message: String },
    /// Authorization status changed.
    Auth { authorized: bool, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderEvent {
    /// Name of the dispatching provider, set by `dispatch_event`.
    pub target: Option<String>,
    pub detail: EventDetail,
}

impl ProviderEvent {
    pub fn loaded(message: impl Into<String>) -> Self {
        Self {
            target: None,
            detail: EventDetail::Loaded {
                message: message.into(),
            },
        }
    }

    pub fn auth(authorized: bool, message: impl Into<String>) -> Self {
        Self {
            target: None,
            detail: EventDetail::Auth {
                authorized,
                message: message.into(),
            },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.detail {
            EventDetail::Loaded { .. } => EventKind::Loaded,
            EventDetail::Auth { .. } => EventKind::Auth,
        }
    }

    /// `(authorized, message)` for `auth` events.
    pub fn auth_detail(&self) -> Option<(bool, &str)> {
        match &self.detail {
            EventDetail::Auth {
                authorized,
                message,
            } => Some((*authorized, message.as_str())),
            EventDetail::Loaded { .. } => None,
        }
    }
}

pub type Listener = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

/// Handle returned by `add_event_listener`, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct EventBus {
    owner: String,
    next_id: AtomicU64,
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

impl EventBus {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_event_listener<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut table = self.listeners.write().expect("listener table poisoned");
        table
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns `false` when `id` was not registered for `kind`.
    pub fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut table = self.listeners.write().expect("listener table poisoned");
        let Some(stack) = table.get_mut(&kind) else {
            return false;
        };
        match stack.iter().position(|(lid, _)| *lid == id) {
            Some(idx) => {
                stack.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every listener of its kind. Returns how many
    /// listeners completed without panicking.
    pub fn dispatch_event(&self, mut event: ProviderEvent) -> usize {
        event.target = Some(self.owner.clone());
        let kind = event.kind();

        // Snapshot so listeners may (un)register without deadlocking.
        let stack: Vec<Listener> = {
            let table = self.listeners.read().expect("listener table poisoned");
            match table.get(&kind) {
                Some(v) => v.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0usize;
        for listener in stack {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic".to_string());
                    tracing::error!(
                        target: "events",
                        provider = %self.owner,
                        kind = ?kind,
                        %reason,
                        "event listener panicked"
                    );
                    counter!("provider_listener_panics_total").increment(1);
                }
            }
        }
        delivered
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        let table = self.listeners.read().expect("listener table poisoned");
        table.get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("owner", &self.owner)
            .field("loaded", &self.listener_count(EventKind::Loaded))
            .field("auth", &self.listener_count(EventKind::Auth))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn dispatch_runs_in_registration_order_and_sets_target() {
        let bus = EventBus::new("Gmail");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            bus.add_event_listener(EventKind::Auth, move |ev| {
                assert_eq!(ev.target.as_deref(), Some("Gmail"));
                seen.lock().unwrap().push(tag);
            });
        }
        let n = bus.dispatch_event(ProviderEvent::auth(true, "Signed in"));
        assert_eq!(n, 3);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn other_kinds_are_not_notified() {
        let bus = EventBus::new("IMAP");
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        bus.add_event_listener(EventKind::Loaded, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.dispatch_event(ProviderEvent::auth(false, "Logout")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let bus = EventBus::new("Twitter");
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        let id = bus.add_event_listener(EventKind::Loaded, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.dispatch_event(ProviderEvent::loaded("API loaded"));
        assert!(bus.remove_event_listener(EventKind::Loaded, id));
        assert!(!bus.remove_event_listener(EventKind::Loaded, id));
        bus.dispatch_event(ProviderEvent::loaded("API loaded"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_the_rest() {
        let bus = EventBus::new("Facebook");
        let hits = Arc::new(AtomicU64::new(0));
        bus.add_event_listener(EventKind::Auth, |_| panic!("listener bug"));
        let h = hits.clone();
        bus.add_event_listener(EventKind::Auth, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let n = bus.dispatch_event(ProviderEvent::auth(true, "Authorization granted"));
        assert_eq!(n, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
