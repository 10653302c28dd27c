// tests/authorize.rs
//
// Authorization lifecycle against a scripted popup controller.
//
// Covered:
// - an existing session short-circuits without a popup
// - concurrent authorize calls share one popup and one outcome
// - popup closed without an answer resolves to "User not logged in"
// - the attempt timeout resolves the same way
// - a late callback cannot overwrite an attempt that already resolved
// - denial and popup failures map to their messages
// - disconnect clears the session and tells listeners
// - a login redirect only completes the attempt whose state it echoes

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};

use grocery_portraits::events::{EventBus, EventKind, ProviderEvent};
use grocery_portraits::oauth::{LoginFlow, LoginReply};
use grocery_portraits::session::{
    AuthBegin, AuthOutcome, AuthStatus, AuthTiming, Authorizer, PopupController, PopupHandle,
    SessionStore, SessionToken, StoredSession,
};

#[derive(Default)]
struct FakePopups {
    opened: AtomicUsize,
    released: AtomicUsize,
    closed: AtomicBool,
    refuse: AtomicBool,
}

impl PopupController for FakePopups {
    fn open(&self, _url: &str) -> Result<PopupHandle> {
        if self.refuse.load(Ordering::SeqCst) {
            bail!("popup blocked");
        }
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(PopupHandle::new(format!("popup-{n}")))
    }

    fn is_closed(&self, _handle: &PopupHandle) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn release(&self, _handle: &PopupHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    store: Arc<SessionStore>,
    popups: Arc<FakePopups>,
    events: Arc<EventBus>,
    auth_events: Arc<Mutex<Vec<(bool, String)>>>,
    authorizer: Authorizer,
}

fn fixture(timeout: Duration) -> Fixture {
    let store = Arc::new(SessionStore::new());
    let popups = Arc::new(FakePopups::default());
    let events = Arc::new(EventBus::new("Mock"));

    let auth_events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&auth_events);
    events.add_event_listener(EventKind::Auth, move |e: &ProviderEvent| {
        if let Some((authorized, message)) = e.auth_detail() {
            sink.lock().unwrap().push((authorized, message.to_string()));
        }
    });

    let timing = AuthTiming {
        poll_interval: Duration::from_millis(10),
        close_grace: Duration::from_millis(10),
        timeout,
    };
    let authorizer = Authorizer::new(
        "Mock",
        LoginFlow::new("https://login.example.test/"),
        Arc::clone(&store),
        Arc::clone(&popups) as Arc<dyn PopupController>,
        Arc::clone(&events),
        timing,
    );
    Fixture {
        store,
        popups,
        events,
        auth_events,
        authorizer,
    }
}

fn session() -> StoredSession {
    StoredSession::new(SessionToken::OAuth2 {
        access_token: "tok".into(),
    })
}

#[tokio::test]
async fn existing_session_needs_no_popup() {
    let f = fixture(Duration::from_secs(5));
    f.store.put("Mock", session());

    let info = f.authorizer.authorize().await;
    assert!(info.success);
    assert_eq!(info.message, "Authorization granted");
    assert_eq!(f.popups.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_callers_share_one_attempt() {
    let f = fixture(Duration::from_secs(5));

    let deliver = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.authorizer.deliver(AuthOutcome::connected(session()))
    };
    let (a, b, delivered) = tokio::join!(f.authorizer.authorize(), f.authorizer.authorize(), deliver);

    assert!(delivered);
    assert!(a.success && b.success);
    assert_eq!(f.popups.opened.load(Ordering::SeqCst), 1);
    assert!(f.authorizer.is_authorized());
    assert_eq!(
        *f.auth_events.lock().unwrap(),
        vec![(true, "Authorization granted".to_string())]
    );
}

#[tokio::test]
async fn closed_popup_means_not_logged_in() {
    let f = fixture(Duration::from_secs(5));

    let AuthBegin::Pending(pending) = f.authorizer.begin() else {
        panic!("expected a pending attempt");
    };
    f.popups.closed.store(true, Ordering::SeqCst);

    let status = f.authorizer.wait(&pending).await;
    assert_eq!(status, AuthStatus::Unknown);
    assert_eq!(status.into_info().message, "User not logged in");
    assert_eq!(f.popups.released.load(Ordering::SeqCst), 1);

    // A callback arriving after the attempt resolved changes nothing.
    assert!(!pending.attempt.complete(AuthStatus::Connected));
    assert_eq!(pending.attempt.wait().await, AuthStatus::Unknown);
}

#[tokio::test]
async fn attempt_times_out() {
    let f = fixture(Duration::from_millis(80));

    let info = f.authorizer.authorize().await;
    assert!(!info.success);
    assert_eq!(info.message, "User not logged in");
    assert!(!f.authorizer.is_authorized());
}

#[tokio::test]
async fn callback_wins_over_close_grace() {
    let f = fixture(Duration::from_secs(5));

    let AuthBegin::Pending(pending) = f.authorizer.begin() else {
        panic!("expected a pending attempt");
    };
    // The provider answers and closes its own window in the same breath.
    assert!(f.authorizer.deliver(AuthOutcome::connected(session())));
    f.popups.closed.store(true, Ordering::SeqCst);

    assert_eq!(f.authorizer.wait(&pending).await, AuthStatus::Connected);
}

#[tokio::test]
async fn denial_and_blocked_popup() {
    let f = fixture(Duration::from_secs(5));

    let denied = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        f.authorizer.deliver(AuthOutcome::failed(AuthStatus::NotAuthorized))
    };
    let (info, _) = tokio::join!(f.authorizer.authorize(), denied);
    assert!(!info.success);
    assert_eq!(info.message, "Authorization denied");
    assert_eq!(
        f.auth_events.lock().unwrap().last().cloned(),
        Some((false, "Not authorized".to_string()))
    );

    f.popups.refuse.store(true, Ordering::SeqCst);
    let info = f.authorizer.authorize().await;
    assert!(!info.success);
    assert_eq!(info.message, "Authorization error");
}

#[tokio::test]
async fn disconnect_clears_session() {
    let f = fixture(Duration::from_secs(5));
    f.store.put("Mock", session());
    assert!(f.authorizer.is_authorized());

    assert!(f.authorizer.disconnect());
    assert!(!f.authorizer.is_authorized());
    assert!(!f.store.is_valid("Mock", chrono::Utc::now()));
    assert_eq!(
        f.auth_events.lock().unwrap().last().cloned(),
        Some((false, "Logout".to_string()))
    );
    assert_eq!(f.events.listener_count(EventKind::Auth), 1);
}

#[tokio::test]
async fn login_redirect_is_bound_to_its_state() {
    let f = fixture(Duration::from_secs(5));
    let AuthBegin::Pending(pending) = f.authorizer.begin() else {
        panic!("expected a pending attempt");
    };
    assert!(pending.login_url.contains(&format!("state={}", pending.state)));

    let forged = LoginReply::Credentials {
        token: SessionToken::OAuth2 {
            access_token: "forged".into(),
        },
        expires_in: None,
    };
    assert!(f.authorizer.complete_login("not-the-state", forged).await.is_none());
    assert!(!f.authorizer.is_authorized());
    assert!(!pending.attempt.is_done());

    let reply = LoginReply::Credentials {
        token: SessionToken::OAuth2 {
            access_token: "tok".into(),
        },
        expires_in: Some(3600),
    };
    let settled = f
        .authorizer
        .complete_login(&pending.state, reply.clone())
        .await
        .expect("state matches");
    assert!(settled.delivered);
    assert_eq!(settled.status, AuthStatus::Connected);
    assert_eq!(f.authorizer.wait(&pending).await, AuthStatus::Connected);
    assert_eq!(f.authorizer.session().unwrap().token.bearer(), "tok");

    // Replaying the same redirect finds nothing to complete.
    assert!(f.authorizer.complete_login(&pending.state, reply).await.is_none());
}

#[tokio::test]
async fn each_attempt_gets_a_new_state() {
    let f = fixture(Duration::from_secs(5));
    let AuthBegin::Pending(first) = f.authorizer.begin() else {
        panic!("expected a pending attempt");
    };
    f.popups.closed.store(true, Ordering::SeqCst);
    f.authorizer.wait(&first).await;
    f.popups.closed.store(false, Ordering::SeqCst);

    let AuthBegin::Pending(second) = f.authorizer.begin() else {
        panic!("expected a pending attempt");
    };
    assert_ne!(first.state, second.state);
    assert!(f.authorizer.pending_for(&first.state).is_none());
    assert!(f.authorizer.pending_for(&second.state).is_some());
}
