// src/session/popup.rs
//! Popup window abstraction used by the authorizer to notice a user who
//! closes the login window without answering.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use serde::Serialize;

/// Identifier of an opened login window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PopupHandle(String);

impl PopupHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub trait PopupController: Send + Sync {
    /// Open a login window on `url`.
    fn open(&self, url: &str) -> Result<PopupHandle>;

    /// Polled by the authorizer. Unknown handles count as closed.
    fn is_closed(&self, handle: &PopupHandle) -> bool;

    /// Called once the attempt owning `handle` has resolved.
    fn release(&self, _handle: &PopupHandle) {}
}

#[derive(Debug)]
struct PopupWindow {
    url: String,
    closed: bool,
}

/// In-memory popup table. The browser opens the window itself and reports
/// the close through the HTTP API (`POST /popups/{id}/closed`).
#[derive(Debug, Default)]
pub struct PopupRegistry {
    windows: Mutex<HashMap<String, PopupWindow>>,
}

impl PopupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` for unknown ids.
    pub fn mark_closed(&self, id: &str) -> bool {
        let mut windows = self.windows.lock().expect("popup table poisoned");
        match windows.get_mut(id) {
            Some(w) => {
                w.closed = true;
                true
            }
            None => false,
        }
    }

    pub fn url(&self, handle: &PopupHandle) -> Option<String> {
        let windows = self.windows.lock().expect("popup table poisoned");
        windows.get(handle.as_str()).map(|w| w.url.clone())
    }

    pub fn open_count(&self) -> usize {
        let windows = self.windows.lock().expect("popup table poisoned");
        windows.values().filter(|w| !w.closed).count()
    }
}

impl PopupController for PopupRegistry {
    fn open(&self, url: &str) -> Result<PopupHandle> {
        let mut windows = self.windows.lock().expect("popup table poisoned");
        let id = loop {
            let candidate = format!("{:016x}", rand::random::<u64>());
            if !windows.contains_key(&candidate) {
                break candidate;
            }
        };
        windows.insert(
            id.clone(),
            PopupWindow {
                url: url.to_string(),
                closed: false,
            },
        );
        Ok(PopupHandle(id))
    }

    fn is_closed(&self, handle: &PopupHandle) -> bool {
        let windows = self.windows.lock().expect("popup table poisoned");
        windows.get(handle.as_str()).map_or(true, |w| w.closed)
    }

    fn release(&self, handle: &PopupHandle) {
        let mut windows = self.windows.lock().expect("popup table poisoned");
        windows.remove(handle.as_str());
    }
}
