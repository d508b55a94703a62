use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::{Query, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use keygate_client_core::auth::{ROUTE_AUTH_CALLBACK, ROUTE_AUTH_DISCORD};
use keygate_client_core::gateway::{
    ROUTE_LINKVERTISE_CALLBACK, ROUTE_LOOTLABS_CALLBACK, ROUTE_LOOTLABS_CALLBACK_ALIAS,
};

pub mod backend;
pub mod callbacks;
pub mod config;
pub mod dashboard;
pub mod notice;
pub mod session;
pub mod visitor;
pub mod web_htmx;
pub mod web_maud;

mod render;

use crate::backend::{BackendError, HttpKeyBackend, KeyBackend};
use crate::callbacks::CallbackLedger;
use crate::config::Config;
use crate::notice::Notice;
use crate::render::page_response;
use crate::session::{CurrentSession, SessionClient, SessionContext, session_gate};
use crate::visitor::{CaptchaState, CurrentVisitor, VisitorStore, visitor_gate};
use crate::web_htmx::navigate;
use crate::web_maud::{
    RenderContext, ROUTE_COUNTDOWN, ROUTE_VERIFY_CAPTCHA, UserView, WebBody, WebPage, render_page,
};

const SERVICE_NAME: &str = "keygate-web-service";
const LOGOUT_SUCCESS_NOTICE: &str = "Logged out successfully";
const LOGOUT_FAILED_NOTICE: &str = "Failed to logout";
const LOGIN_FAILED_NOTICE: &str = "Unable to start Discord login. Please try again.";

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    backend: Arc<dyn KeyBackend>,
    sessions: SessionClient,
    visitors: VisitorStore,
    callbacks: CallbackLedger,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    static_dir: String,
}

#[derive(Debug, Default, Deserialize)]
struct NoticeQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    meg: Option<String>,
}

pub fn build_router(config: Config) -> Result<Router, BackendError> {
    let backend = HttpKeyBackend::from_config(&config)?;
    Ok(build_router_with_backend(config, Arc::new(backend)))
}

pub fn build_router_with_backend(config: Config, backend: Arc<dyn KeyBackend>) -> Router {
    let ttl = Duration::from_secs(config.visitor_ttl_seconds);
    let state = AppState {
        config: Arc::new(config),
        sessions: SessionClient::new(backend.clone()),
        backend,
        visitors: VisitorStore::new(ttl),
        callbacks: CallbackLedger::new(ttl),
        started_at: SystemTime::now(),
    };
    let session_state = state.clone();
    let visitor_state = state.clone();
    let static_dir = state.config.static_dir.clone();

    let session_routes = Router::new()
        .route("/", get(home_page))
        .route("/getkey", get(dashboard::dashboard_page))
        .route(ROUTE_COUNTDOWN, get(dashboard::countdown_fragment))
        .route(ROUTE_VERIFY_CAPTCHA, post(dashboard::verify_captcha))
        .route(
            "/getkey/provider/:provider",
            post(dashboard::provider_redirect),
        )
        .route_layer(middleware::from_fn_with_state(session_state, session_gate));

    let page_routes = Router::new()
        .route("/login", get(login))
        .route("/logout", post(logout))
        .route(ROUTE_AUTH_CALLBACK, get(callbacks::identity_callback))
        .route(ROUTE_LOOTLABS_CALLBACK, get(callbacks::ad_gateway_callback))
        .route(
            ROUTE_LOOTLABS_CALLBACK_ALIAS,
            get(callbacks::ad_gateway_callback),
        )
        .route(
            ROUTE_LINKVERTISE_CALLBACK,
            get(callbacks::ad_gateway_callback),
        )
        .merge(session_routes)
        .route_layer(middleware::from_fn_with_state(visitor_state, visitor_gate));

    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        .nest_service("/assets", ServeDir::new(static_dir))
        .merge(page_routes)
        .fallback(not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
    })
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let static_dir = state.config.static_dir.to_string_lossy().to_string();

    if state.config.static_dir.is_dir() {
        return (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                static_dir,
            }),
        );
    }

    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadinessResponse {
            status: "not_ready",
            static_dir,
        }),
    )
}

async fn home_page(
    State(state): State<AppState>,
    CurrentVisitor(visitor): CurrentVisitor,
    CurrentSession(context): CurrentSession,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let mut notices = Notice::from_query(query.kind.as_deref(), query.meg.as_deref())
        .into_iter()
        .collect::<Vec<_>>();
    notices.extend(state.visitors.drain_notices(visitor).await);

    let signed_in = context.user_id().is_some();
    let page = WebPage::new("Home", WebBody::Home { signed_in })
        .with_user(render::user_view(&context))
        .with_notices(notices);
    page_response(&state, StatusCode::OK, page)
}

async fn login(
    State(state): State<AppState>,
    CurrentVisitor(visitor): CurrentVisitor,
    headers: HeaderMap,
) -> Response {
    let credentials = backend::BackendCredentials::from_headers(&headers);
    match state.sessions.login(&credentials).await {
        Ok(()) => navigate(
            &headers,
            &format!("{}{ROUTE_AUTH_DISCORD}", state.config.api_base_url),
        ),
        Err(error) => {
            tracing::warn!(request_id = %request_id(&headers), %error, "login entry point unavailable");
            state
                .visitors
                .push_notice(visitor, Notice::error(LOGIN_FAILED_NOTICE))
                .await;
            navigate(&headers, "/")
        }
    }
}

async fn logout(
    State(state): State<AppState>,
    CurrentVisitor(visitor): CurrentVisitor,
    headers: HeaderMap,
) -> Response {
    let credentials = backend::BackendCredentials::from_headers(&headers);
    match state.sessions.logout(&credentials).await {
        Ok(outcome) => {
            state
                .visitors
                .update(visitor, |visitor_state| {
                    visitor_state.captcha = CaptchaState::Unverified;
                    visitor_state.key = None;
                    visitor_state
                        .notices
                        .push_back(Notice::success(LOGOUT_SUCCESS_NOTICE));
                })
                .await;

            let mut response = navigate(&headers, "/");
            for cookie in &outcome.set_cookies {
                append_set_cookie_header(&mut response, cookie);
            }
            response
        }
        Err(error) => {
            tracing::warn!(request_id = %request_id(&headers), %error, "logout failed");
            state
                .visitors
                .push_notice(visitor, Notice::error(LOGOUT_FAILED_NOTICE))
                .await;
            navigate(&headers, "/getkey")
        }
    }
}

async fn not_found(State(state): State<AppState>, request: Request) -> Response {
    tracing::debug!(path = %request.uri().path(), "route not found");
    not_found_response(&state)
}

fn not_found_response(state: &AppState) -> Response {
    page_response(
        state,
        StatusCode::NOT_FOUND,
        WebPage::new("404 - Page Not Found", WebBody::NotFound),
    )
}

fn append_set_cookie_header(response: &mut Response, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(error) => {
            tracing::warn!(%error, "dropping unencodable backend cookie");
        }
    }
}

fn extract_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        let mut pieces = part.trim().splitn(2, '=');
        let key = pieces.next()?.trim();
        let value = pieces.next()?.trim();

        if key == cookie_name {
            return non_empty(value.to_string());
        }
    }

    None
}

fn request_id(headers: &HeaderMap) -> String {
    header_string(headers, "x-request-id")
        .and_then(non_empty)
        .unwrap_or_else(|| format!("req_{}", Uuid::new_v4().simple()))
}

fn header_string(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests;
