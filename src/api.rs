// src/api.rs
//! HTTP surface for the UI driver.
//!
//! Provider routes run inside a client scope: the `gp_client` cookie picks
//! the caller's own registry, and a browser without a valid cookie gets a
//! fresh one.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, warn};

use crate::client::{parse_cookie, ClientId, ClientRegistries, CookieSigner, COOKIE_NAME};
use crate::info::{FetchOptions, FetchResult};
use crate::oauth::LoginReply;
use crate::provider::{Provider, ProviderSummary};
use crate::registry::ProviderRegistry;
use crate::scrape::{scrape_random, ScrapeOutcome};
use crate::session::{AuthBegin, AuthStatus, PopupRegistry, SessionToken};
use crate::timeutil::{from_timestamp, timestamp};
use crate::window::DateRange;

/// Window length used by `/scrape` when `span` is absent.
pub const DEFAULT_SPAN_DAYS: i64 = 7;

#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<ClientRegistries>,
    pub popups: Arc<PopupRegistry>,
    pub signer: CookieSigner,
}

impl AppState {
    pub fn new(clients: Arc<ClientRegistries>, popups: Arc<PopupRegistry>, signer: CookieSigner) -> Self {
        Self {
            clients,
            popups,
            signer,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let scoped = Router::new()
        .route("/providers", get(list_providers))
        .route("/providers/{name}/authorize", post(authorize))
        .route("/providers/{name}/callback", get(callback))
        .route("/providers/{name}/session", delete(disconnect))
        .route("/providers/{name}/min-date", get(min_date))
        .route("/providers/{name}/fetch", get(fetch))
        .route("/providers/{name}/scrape", get(scrape))
        .route_layer(middleware::from_fn_with_state(state.clone(), client_scope));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/popups/{id}/closed", post(popup_closed))
        .merge(scoped)
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(what: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: what.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// The calling client and its providers.
#[derive(Clone)]
pub struct ClientScope {
    pub id: ClientId,
    pub registry: Arc<ProviderRegistry>,
}

impl ClientScope {
    fn provider(&self, name: &str) -> Result<Arc<Provider>, ApiError> {
        self.registry
            .get(name)
            .ok_or_else(|| ApiError::not_found(format!("unknown provider '{name}'")))
    }
}

async fn client_scope(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let now = Utc::now();
    let presented = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| parse_cookie(h, COOKIE_NAME))
        .and_then(|v| state.signer.verify(v, now));
    let fresh = presented.is_none();
    let id = presented.unwrap_or_else(ClientId::generate);

    let registry = match state.clients.registry_for(&id) {
        Ok(r) => r,
        Err(e) => {
            error!(target: "api", error = ?e, "cannot build client registry");
            return ApiError::internal("provider setup failed").into_response();
        }
    };
    req.extensions_mut().insert(ClientScope {
        id: id.clone(),
        registry,
    });

    let mut resp = next.run(req).await;
    if fresh {
        match HeaderValue::from_str(&state.signer.set_cookie(&id, now)) {
            Ok(v) => {
                resp.headers_mut().append(header::SET_COOKIE, v);
            }
            Err(e) => warn!(target: "api", error = ?e, "client cookie not representable"),
        }
    }
    resp
}

async fn list_providers(Extension(scope): Extension<ClientScope>) -> Json<Vec<ProviderSummary>> {
    Json(scope.registry.summaries())
}

#[derive(Debug, Default, Deserialize)]
struct AuthorizeQuery {
    /// Block until the attempt resolves instead of answering 202.
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Serialize)]
struct PendingOut {
    pending: bool,
    login_url: String,
    popup_id: String,
}

async fn authorize(
    Extension(scope): Extension<ClientScope>,
    Path(name): Path<String>,
    Query(q): Query<AuthorizeQuery>,
) -> Result<Response, ApiError> {
    let provider = scope.provider(&name)?;

    if q.wait {
        return Ok(Json(provider.authorize().await).into_response());
    }

    match provider.begin_authorize() {
        AuthBegin::Resolved(status) => Ok(Json(status.into_info()).into_response()),
        AuthBegin::Pending(pending) => {
            let out = PendingOut {
                pending: true,
                login_url: pending.login_url.clone(),
                popup_id: pending.popup.as_str().to_string(),
            };
            // Someone has to reap the attempt once the callback or the popup
            // watcher resolves it.
            let reaper = Arc::clone(&provider);
            tokio::spawn(async move {
                let status = reaper.authorizer().wait(&pending).await;
                debug!(target: "api", provider = reaper.name(), status = status.as_str(), "authorization settled");
            });
            Ok((StatusCode::ACCEPTED, Json(out)).into_response())
        }
    }
}

/// Parameters of the login redirect.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub session: Option<String>,
    pub expires_in: Option<i64>,
}

impl CallbackQuery {
    fn token(&self) -> Option<SessionToken> {
        if let Some(access_token) = self.access_token.clone() {
            return Some(SessionToken::OAuth2 { access_token });
        }
        if let (Some(user), Some(host), Some(session)) =
            (self.user.clone(), self.host.clone(), self.session.clone())
        {
            return Some(SessionToken::Mailbox { user, host, session });
        }
        None
    }

    /// A failing `status` wins; an OAuth `error` means denial when it says
    /// so. Otherwise a code, then direct credentials.
    pub fn reply(&self) -> LoginReply {
        let status = self.status.as_deref().map(AuthStatus::from_wire);
        match (&status, self.error.as_deref()) {
            (Some(s), _) if !s.is_connected() => return LoginReply::Status(s.clone()),
            (None, Some("access_denied")) => return LoginReply::Status(AuthStatus::NotAuthorized),
            (None, Some(_)) => return LoginReply::Status(AuthStatus::Error),
            _ => {}
        }

        if let Some(code) = self.code.clone().filter(|c| !c.is_empty()) {
            return LoginReply::Code(code);
        }
        if let Some(token) = self.token() {
            return LoginReply::Credentials {
                token,
                expires_in: self.expires_in,
            };
        }
        match status {
            // Connected without credentials: the authorizer reports an error.
            Some(s) => LoginReply::Status(s),
            None => LoginReply::Empty,
        }
    }
}

async fn callback(
    Extension(scope): Extension<ClientScope>,
    Path(name): Path<String>,
    Query(q): Query<CallbackQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = scope.provider(&name)?;
    let Some(state) = q.state.as_deref().filter(|s| !s.is_empty()) else {
        warn!(target: "api", provider = provider.name(), "callback without state");
        return Err(ApiError::bad_request("missing login state"));
    };

    let Some(settled) = provider.authorizer().complete_login(state, q.reply()).await else {
        return Err(ApiError::bad_request("no login in progress for this state"));
    };
    if !settled.delivered {
        warn!(target: "api", provider = provider.name(), status = settled.status.as_str(), "callback after the attempt resolved");
    }
    Ok(Json(json!({
        "delivered": settled.delivered,
        "status": settled.status.as_str(),
        "authorized": provider.is_authorized(),
    })))
}

async fn popup_closed(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.popups.mark_closed(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn disconnect(
    Extension(scope): Extension<ClientScope>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = scope.provider(&name)?;
    let removed = provider.disconnect();
    Ok(Json(json!({ "success": true, "removed": removed })))
}

async fn min_date(
    Extension(scope): Extension<ClientScope>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = scope.provider(&name)?;
    let min = provider.get_min_date().await;
    Ok(Json(json!({ "min_date": min.map(timestamp) })))
}

#[derive(Debug, Default, Deserialize)]
struct FetchQuery {
    since: Option<i64>,
    until: Option<i64>,
}

fn parse_bound(field: &str, secs: Option<i64>) -> Result<Option<chrono::DateTime<Utc>>, ApiError> {
    match secs {
        None => Ok(None),
        Some(s) => from_timestamp(s)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("{field} out of range"))),
    }
}

async fn fetch(
    Extension(scope): Extension<ClientScope>,
    Path(name): Path<String>,
    Query(q): Query<FetchQuery>,
) -> Result<Json<FetchResult>, ApiError> {
    let provider = scope.provider(&name)?;
    let options = FetchOptions {
        since: parse_bound("since", q.since)?,
        until: parse_bound("until", q.until)?,
    };
    Ok(Json(provider.fetch(&options).await))
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeQuery {
    #[serde(default)]
    range: String,
    span: Option<i64>,
}

async fn scrape(
    Extension(scope): Extension<ClientScope>,
    Path(name): Path<String>,
    Query(q): Query<ScrapeQuery>,
) -> Result<Json<ScrapeOutcome>, ApiError> {
    let provider = scope.provider(&name)?;
    let range: DateRange = q
        .range
        .parse()
        .map_err(|e: anyhow::Error| ApiError::bad_request(e.to_string()))?;
    let span = q.span.unwrap_or(DEFAULT_SPAN_DAYS);
    if span < 0 {
        return Err(ApiError::bad_request("span must not be negative"));
    }

    let mut rng = StdRng::from_os_rng();
    Ok(Json(scrape_random(&provider, range, span, &mut rng).await))
}
