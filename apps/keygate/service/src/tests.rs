use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, SecondsFormat, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use uuid::Uuid;

use keygate_client_core::Session;
use keygate_client_core::keys::{
    CheckKeyResponse, CreateTokenResponse, EncryptLinkResponse, GenerateKeyResponse,
    KeyExpiryResponse, VerifyCaptchaResponse,
};

use crate::backend::{BackendCredentials, BackendError, KeyBackend, LogoutOutcome};
use crate::{build_router, build_router_with_backend};
use crate::callbacks::{AUTH_MISSING_CODE_MESSAGE, INVALID_CALLBACK_MESSAGE};
use crate::config::Config;
use crate::dashboard::{CAPTCHA_PROMPT_WITH_KEY, CAPTCHA_REJECTED_NOTICE};

const STUB_USER_ID: &str = "123456789";
const STUB_KEY: &str = "KG-7F3A-91C2";
const STUB_TOKEN: &str = "tok_abc";
const BACKEND_SESSION_COOKIE: &str = "connect.sid=live";

#[derive(Debug, Clone)]
struct RecordedCall {
    route: String,
    secret: Option<String>,
    payload: Value,
}

#[derive(Debug, Clone, Copy)]
enum StubExpiry {
    OneHour,
    Past,
}

#[derive(Debug, Clone)]
struct StubBehavior {
    key: Option<&'static str>,
    expiry: StubExpiry,
    captcha_accepts: bool,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            key: Some(STUB_KEY),
            expiry: StubExpiry::OneHour,
            captcha_accepts: true,
        }
    }
}

#[derive(Clone)]
struct StubState {
    behavior: StubBehavior,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl StubState {
    async fn record(&self, route: &str, headers: &HeaderMap, payload: Value) {
        let secret = headers
            .get("x-secret")
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        self.calls.lock().await.push(RecordedCall {
            route: route.to_string(),
            secret,
            payload,
        });
    }
}

async fn start_backend_stub(
    behavior: StubBehavior,
) -> Result<(SocketAddr, Arc<Mutex<Vec<RecordedCall>>>, JoinHandle<()>)> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let stub_state = StubState {
        behavior,
        calls: calls.clone(),
    };

    let app = Router::new()
        .route(
            "/auth/session",
            get(|headers: HeaderMap| async move {
                let signed_in = headers
                    .get(COOKIE)
                    .and_then(|value| value.to_str().ok())
                    .is_some_and(|value| value.contains(BACKEND_SESSION_COOKIE));
                if signed_in {
                    Json(json!({
                        "user": {
                            "id": STUB_USER_ID,
                            "username": "keytester",
                            "avatar": "cafebabe"
                        }
                    }))
                } else {
                    Json(json!({}))
                }
            }),
        )
        .route(
            "/auth/discord",
            get(|| async { Redirect::to("https://discord.com/oauth2/authorize") }),
        )
        .route(
            "/auth/logout",
            post(
                |State(stub): State<StubState>, headers: HeaderMap| async move {
                    stub.record("/auth/logout", &headers, Value::Null).await;
                    (
                        [(SET_COOKIE, "connect.sid=; Path=/; Max-Age=0")],
                        Json(json!({ "success": true })),
                    )
                },
            ),
        )
        .route(
            "/api/chack-key",
            get(
                |State(stub): State<StubState>,
                 headers: HeaderMap,
                 Query(query): Query<HashMap<String, String>>| async move {
                    stub.record(
                        "/api/chack-key",
                        &headers,
                        json!({ "discord_id": query.get("discord_id") }),
                    )
                    .await;
                    match stub.behavior.key {
                        Some(key) => Json(json!({ "valid": true, "key": key })),
                        None => Json(json!({ "valid": false })),
                    }
                },
            ),
        )
        .route(
            "/api/expiredAt",
            post(
                |State(stub): State<StubState>,
                 headers: HeaderMap,
                 Json(payload): Json<Value>| async move {
                    stub.record("/api/expiredAt", &headers, payload).await;
                    let expires_at = match stub.behavior.expiry {
                        StubExpiry::OneHour => {
                            Utc::now() + Duration::hours(1) + Duration::milliseconds(900)
                        }
                        StubExpiry::Past => Utc::now() - Duration::minutes(5),
                    };
                    Json(json!({
                        "expiredAt": expires_at.to_rfc3339_opts(SecondsFormat::Millis, true)
                    }))
                },
            ),
        )
        .route(
            "/api/verify-turnstile",
            post(
                |State(stub): State<StubState>,
                 headers: HeaderMap,
                 Json(payload): Json<Value>| async move {
                    stub.record("/api/verify-turnstile", &headers, payload).await;
                    Json(json!({ "success": stub.behavior.captcha_accepts }))
                },
            ),
        )
        .route(
            "/api/create-token",
            post(
                |State(stub): State<StubState>, headers: HeaderMap| async move {
                    stub.record("/api/create-token", &headers, Value::Null).await;
                    Json(json!({ "success": true, "token": STUB_TOKEN }))
                },
            ),
        )
        .route(
            "/api/encryptLink",
            post(
                |State(stub): State<StubState>,
                 headers: HeaderMap,
                 Json(payload): Json<Value>| async move {
                    stub.record("/api/encryptLink", &headers, payload).await;
                    Json(json!({ "encryptedLink": "enc/payload+1" }))
                },
            ),
        )
        .route(
            "/api/genkey-loot",
            post(
                |State(stub): State<StubState>,
                 headers: HeaderMap,
                 Json(payload): Json<Value>| async move {
                    stub.record("/api/genkey-loot", &headers, payload.clone()).await;
                    if payload["token"] == "tok_spent" {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "success": false, "message": "Token already used" })),
                        )
                            .into_response();
                    }
                    Json(json!({ "success": true })).into_response()
                },
            ),
        )
        .with_state(stub_state);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("backend stub server failed");
    });

    Ok((addr, calls, handle))
}

fn test_config(static_dir: PathBuf, backend: SocketAddr) -> Config {
    let mut config = Config::for_tests(static_dir);
    config.api_base_url = format!("http://{backend}");
    config
}

async fn test_app(behavior: StubBehavior) -> Result<(Router, Arc<Mutex<Vec<RecordedCall>>>)> {
    let (addr, calls, _handle) = start_backend_stub(behavior).await?;
    let app = build_router(test_config(std::env::temp_dir(), addr))?;
    Ok((app, calls))
}

fn new_visitor() -> String {
    Uuid::new_v4().simple().to_string()
}

fn signed_in_cookie(visitor: &str) -> String {
    format!("kg_visitor={visitor}; {BACKEND_SESSION_COOKIE}")
}

fn get_request(uri: &str, cookie: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .uri(uri)
        .header(COOKIE, cookie)
        .body(Body::empty())?)
}

fn post_form(uri: &str, cookie: &str, form: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(COOKIE, cookie)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))?)
}

async fn read_json(response: axum::response::Response) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    let value = serde_json::from_slice::<Value>(&bytes)?;
    Ok(value)
}

async fn read_text(response: axum::response::Response) -> Result<String> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn location(response: &axum::response::Response) -> Option<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

async fn calls_to(calls: &Arc<Mutex<Vec<RecordedCall>>>, route: &str) -> Vec<RecordedCall> {
    calls
        .lock()
        .await
        .iter()
        .filter(|call| call.route == route)
        .cloned()
        .collect()
}

async fn verify_captcha(app: &Router, cookie: &str) -> Result<()> {
    let response = app
        .clone()
        .oneshot(post_form(
            "/getkey/verify",
            cookie,
            "cf-turnstile-response=turnstile-ok",
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/getkey"));
    Ok(())
}

#[tokio::test]
async fn healthz_route_returns_ok() -> Result<()> {
    let (app, _calls) = test_app(StubBehavior::default()).await?;
    let request = Request::builder().uri("/healthz").body(Body::empty())?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-request-id").is_some());
    let body = read_json(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "keygate-web-service");
    Ok(())
}

#[tokio::test]
async fn readyz_tracks_static_dir_presence() -> Result<()> {
    let (addr, _calls, _handle) = start_backend_stub(StubBehavior::default()).await?;
    let static_dir = tempdir()?;

    let app = build_router(test_config(static_dir.path().to_path_buf(), addr))?;
    let response = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await?["status"], "ready");

    let missing = static_dir.path().join("missing");
    let app = build_router(test_config(missing, addr))?;
    let response = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(read_json(response).await?["status"], "not_ready");
    Ok(())
}

#[tokio::test]
async fn static_assets_are_served_from_static_dir() -> Result<()> {
    let (addr, _calls, _handle) = start_backend_stub(StubBehavior::default()).await?;
    let static_dir = tempdir()?;
    std::fs::write(static_dir.path().join("keygate.css"), "body{}")?;

    let app = build_router(test_config(static_dir.path().to_path_buf(), addr))?;
    let response = app
        .oneshot(Request::builder().uri("/assets/keygate.css").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_text(response).await?, "body{}");
    Ok(())
}

#[tokio::test]
async fn unknown_route_renders_not_found_page() -> Result<()> {
    let (app, _calls) = test_app(StubBehavior::default()).await?;
    let response = app
        .oneshot(Request::builder().uri("/does-not-exist").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_text(response).await?;
    assert!(body.contains("Lost in the Matrix?"));
    assert!(body.contains("Return to Safety"));
    Ok(())
}

#[tokio::test]
async fn home_page_sets_visitor_cookie_and_security_headers() -> Result<()> {
    let (app, _calls) = test_app(StubBehavior::default()).await?;
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with("kg_visitor="));
    assert!(cookie.contains("HttpOnly"));

    let csp = response
        .headers()
        .get("content-security-policy")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(csp.contains("https://challenges.cloudflare.com"));
    assert!(csp.contains("'nonce-"));

    let body = read_text(response).await?;
    assert!(body.contains("href=\"/login\""));
    Ok(())
}

#[tokio::test]
async fn home_page_renders_query_notice() -> Result<()> {
    let (app, _calls) = test_app(StubBehavior::default()).await?;
    let response = app
        .oneshot(get_request(
            "/?type=success&meg=Welcome%26nbsp%3Bback",
            &format!("kg_visitor={}", new_visitor()),
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_text(response).await?;
    assert!(body.contains("Welcome back"));
    Ok(())
}

#[tokio::test]
async fn anonymous_dashboard_redirects_home() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = format!("kg_visitor={}", new_visitor());

    let response = app.clone().oneshot(get_request("/getkey", &cookie)?).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/"));

    let request = Request::builder()
        .uri("/getkey")
        .header(COOKIE, &cookie)
        .header("hx-request", "true")
        .body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("HX-Redirect")
            .and_then(|value| value.to_str().ok()),
        Some("/")
    );
    assert!(calls.lock().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn key_stays_hidden_until_captcha_is_verified() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());

    let response = app.clone().oneshot(get_request("/getkey", &cookie)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_text(response).await?;
    assert!(!body.contains(STUB_KEY));
    assert!(body.contains("cf-turnstile"));
    assert!(body.contains(CAPTCHA_PROMPT_WITH_KEY));

    let check_calls = calls_to(&calls, "/api/chack-key").await;
    assert_eq!(check_calls.len(), 1);
    assert_eq!(check_calls[0].payload["discord_id"], STUB_USER_ID);
    assert_eq!(check_calls[0].secret.as_deref(), Some("keygate-test-secret"));
    let expiry_calls = calls_to(&calls, "/api/expiredAt").await;
    assert_eq!(expiry_calls.len(), 1);
    assert_eq!(expiry_calls[0].payload["key"], STUB_KEY);
    assert!(calls_to(&calls, "/api/verify-turnstile").await.is_empty());

    let response = app
        .clone()
        .oneshot(get_request("/getkey/countdown", &cookie)?)
        .await?;
    let fragment = read_text(response).await?;
    assert!(!fragment.contains("hx-get"));
    assert!(!fragment.contains("data-expires-at"));

    verify_captcha(&app, &cookie).await?;
    let verify_calls = calls_to(&calls, "/api/verify-turnstile").await;
    assert_eq!(verify_calls.len(), 1);
    assert_eq!(verify_calls[0].payload["token"], "turnstile-ok");
    assert_eq!(verify_calls[0].secret.as_deref(), Some("keygate-test-secret"));

    let response = app.oneshot(get_request("/getkey", &cookie)?).await?;
    let body = read_text(response).await?;
    assert!(body.contains(STUB_KEY));
    assert!(body.contains("data-copy-target=\"kg-key\""));
    assert!(!body.contains("cf-turnstile"));
    Ok(())
}

#[tokio::test]
async fn rejected_captcha_keeps_the_captcha_view() -> Result<()> {
    let (app, _calls) = test_app(StubBehavior {
        captcha_accepts: false,
        ..StubBehavior::default()
    })
    .await?;
    let cookie = signed_in_cookie(&new_visitor());

    verify_captcha(&app, &cookie).await?;

    let response = app.oneshot(get_request("/getkey", &cookie)?).await?;
    let body = read_text(response).await?;
    assert!(body.contains("cf-turnstile"));
    assert!(body.contains(CAPTCHA_REJECTED_NOTICE));
    assert!(!body.contains(STUB_KEY));
    Ok(())
}

#[tokio::test]
async fn verified_visitor_without_key_sees_get_key_button() -> Result<()> {
    let (app, _calls) = test_app(StubBehavior {
        key: None,
        ..StubBehavior::default()
    })
    .await?;
    let cookie = signed_in_cookie(&new_visitor());
    verify_captcha(&app, &cookie).await?;

    let response = app
        .clone()
        .oneshot(get_request("/getkey", &cookie)?)
        .await?;
    let body = read_text(response).await?;
    assert!(body.contains("href=\"/getkey?picker=open\""));
    assert!(!body.contains("Select Provider"));

    let response = app
        .oneshot(get_request("/getkey?picker=open", &cookie)?)
        .await?;
    let body = read_text(response).await?;
    assert!(body.contains("Select Provider"));
    assert!(body.contains("/getkey/provider/lootlabs"));
    assert!(body.contains("/getkey/provider/linkvertise"));
    Ok(())
}

#[tokio::test]
async fn countdown_fragment_reports_time_left() -> Result<()> {
    let (app, _calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());
    verify_captcha(&app, &cookie).await?;

    let response = app
        .clone()
        .oneshot(get_request("/getkey", &cookie)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get_request("/getkey/countdown", &cookie)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let fragment = read_text(response).await?;
    assert!(fragment.contains("1h 0m 0s"));
    assert!(fragment.contains("hx-trigger=\"every 1s\""));
    assert!(fragment.contains("data-expires-at=\""));
    Ok(())
}

#[tokio::test]
async fn dashboard_countdown_ticks_without_htmx_asset() -> Result<()> {
    let (addr, _calls, _handle) = start_backend_stub(StubBehavior::default()).await?;
    let static_dir = tempdir()?;
    let app = build_router(test_config(static_dir.path().to_path_buf(), addr))?;
    let cookie = signed_in_cookie(&new_visitor());
    verify_captcha(&app, &cookie).await?;

    let asset = app
        .clone()
        .oneshot(get_request("/assets/htmx-2.0.8.min.js", &cookie)?)
        .await?;
    assert_eq!(asset.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get_request("/getkey", &cookie)?).await?;
    let body = read_text(response).await?;
    let expiry = body
        .split("data-expires-at=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap_or_default()
        .to_string();
    assert!(keygate_client_core::parse_expiry(&expiry).is_some());
    assert!(body.contains("setInterval(keygateTick, 1000)"));
    Ok(())
}

#[tokio::test]
async fn countdown_fragment_stops_polling_once_expired() -> Result<()> {
    let (app, _calls) = test_app(StubBehavior {
        expiry: StubExpiry::Past,
        ..StubBehavior::default()
    })
    .await?;
    let cookie = signed_in_cookie(&new_visitor());
    verify_captcha(&app, &cookie).await?;

    let response = app
        .clone()
        .oneshot(get_request("/getkey", &cookie)?)
        .await?;
    let body = read_text(response).await?;
    assert!(body.contains("Expired"));

    let response = app
        .oneshot(get_request("/getkey/countdown", &cookie)?)
        .await?;
    let fragment = read_text(response).await?;
    assert!(fragment.contains("Expired"));
    assert!(!fragment.contains("hx-get"));
    Ok(())
}

#[tokio::test]
async fn ad_gateway_callback_generates_key_once_per_token() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());
    let uri = format!("/getkey/lootlabs-callback?token=tok_fresh&discord_id={STUB_USER_ID}");

    let response = app.clone().oneshot(get_request(&uri, &cookie)?).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/getkey"));

    let response = app.clone().oneshot(get_request(&uri, &cookie)?).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let generate_calls = calls_to(&calls, "/api/genkey-loot").await;
    assert_eq!(generate_calls.len(), 1);
    assert_eq!(generate_calls[0].payload["token"], "tok_fresh");
    assert_eq!(generate_calls[0].payload["discord_id"], STUB_USER_ID);
    assert_eq!(
        generate_calls[0].secret.as_deref(),
        Some("keygate-test-secret")
    );

    verify_captcha(&app, &cookie).await?;
    let response = app.oneshot(get_request("/getkey", &cookie)?).await?;
    let body = read_text(response).await?;
    assert!(body.contains("Key generated successfully!"));
    Ok(())
}

#[tokio::test]
async fn linkvertise_callback_accepts_swapped_parameter_order() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());
    let uri = format!("/linkvertise-callback?discord_id={STUB_USER_ID}&token=tok_lv");

    let response = app.oneshot(get_request(&uri, &cookie)?).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/getkey"));
    assert_eq!(calls_to(&calls, "/api/genkey-loot").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn ad_gateway_callback_surfaces_backend_rejection() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());
    let uri = format!("/lootlabs-callback?token=tok_spent&discord_id={STUB_USER_ID}");

    let response = app.clone().oneshot(get_request(&uri, &cookie)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_text(response).await?;
    assert!(body.contains("Token already used"));
    assert!(body.contains("Failed to generate key"));
    assert!(body.contains("content=\"3;url=/\""));

    let response = app.oneshot(get_request(&uri, &cookie)?).await?;
    let body = read_text(response).await?;
    assert!(body.contains("Token already used"));
    assert_eq!(calls_to(&calls, "/api/genkey-loot").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn ad_gateway_callback_without_params_never_calls_backend() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());

    for uri in [
        "/getkey/lootlabs-callback",
        "/getkey/lootlabs-callback?token=tok_only",
        "/linkvertise-callback?discord_id=123456789&token=%20",
    ] {
        let response = app.clone().oneshot(get_request(uri, &cookie)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_text(response).await?;
        assert!(body.contains(INVALID_CALLBACK_MESSAGE));
        assert!(body.contains("Invalid request"));
        assert!(body.contains("http-equiv=\"refresh\""));
        assert!(body.contains("content=\"3;url=/\""));
    }

    assert!(calls_to(&calls, "/api/genkey-loot").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn identity_callback_with_code_forwards_to_backend() -> Result<()> {
    let (addr, _calls, _handle) = start_backend_stub(StubBehavior::default()).await?;
    let app = build_router(test_config(std::env::temp_dir(), addr))?;
    let cookie = format!("kg_visitor={}", new_visitor());

    let response = app
        .oneshot(get_request("/auth/callback?code=abc%2F123", &cookie)?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        Some(format!("http://{addr}/auth/callback?code=abc%2F123"))
    );
    let body = read_text(response).await?;
    assert!(!body.contains(AUTH_MISSING_CODE_MESSAGE));
    Ok(())
}

#[tokio::test]
async fn identity_callback_without_code_notifies_once_per_visitor() -> Result<()> {
    let (app, _calls) = test_app(StubBehavior::default()).await?;
    let cookie = format!("kg_visitor={}", new_visitor());

    let response = app
        .clone()
        .oneshot(get_request("/auth/callback", &cookie)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_text(response).await?;
    assert_eq!(body.matches(AUTH_MISSING_CODE_MESSAGE).count(), 1);
    assert!(body.contains("content=\"2;url=/\""));

    let response = app
        .clone()
        .oneshot(get_request("/auth/callback", &cookie)?)
        .await?;
    let body = read_text(response).await?;
    assert!(!body.contains(AUTH_MISSING_CODE_MESSAGE));
    assert!(body.contains("content=\"2;url=/\""));

    let other_visitor = format!("kg_visitor={}", new_visitor());
    let response = app
        .oneshot(get_request("/auth/callback", &other_visitor)?)
        .await?;
    let body = read_text(response).await?;
    assert!(body.contains(AUTH_MISSING_CODE_MESSAGE));
    Ok(())
}

#[tokio::test]
async fn lootlabs_provider_builds_outbound_link() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());
    verify_captcha(&app, &cookie).await?;

    let response = app
        .oneshot(post_form("/getkey/provider/lootlabs", &cookie, "")?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response).as_deref(),
        Some("https://lootdest.org/s?OEAFxRAD&data=enc%2Fpayload%2B1")
    );

    assert_eq!(calls_to(&calls, "/api/create-token").await.len(), 1);
    let encrypt_calls = calls_to(&calls, "/api/encryptLink").await;
    assert_eq!(encrypt_calls.len(), 1);
    assert_eq!(
        encrypt_calls[0].payload["destination_url"],
        format!(
            "https://key.keygate.test/getkey/lootlabs-callback?token={STUB_TOKEN}&discord_id={STUB_USER_ID}"
        )
    );
    Ok(())
}

#[tokio::test]
async fn linkvertise_provider_embeds_return_url() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());
    verify_captcha(&app, &cookie).await?;

    let request = Request::builder()
        .method("POST")
        .uri("/getkey/provider/linkvertise")
        .header(COOKIE, &cookie)
        .header("hx-request", "true")
        .body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let outbound = response
        .headers()
        .get("HX-Redirect")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(outbound.starts_with("https://link-to.net/1162634/"));
    assert!(outbound.contains("/dynamic?r="));

    let encrypt_calls = calls_to(&calls, "/api/encryptLink").await;
    assert_eq!(encrypt_calls.len(), 1);
    assert_eq!(
        encrypt_calls[0].payload["destination_url"],
        format!(
            "https://key.keygate.test/linkvertise-callback?discord_id={STUB_USER_ID}&token={STUB_TOKEN}"
        )
    );
    Ok(())
}

#[tokio::test]
async fn provider_redirect_requires_captcha_and_known_provider() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());

    let response = app
        .clone()
        .oneshot(post_form("/getkey/provider/lootlabs", &cookie, "")?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/getkey"));
    assert!(calls_to(&calls, "/api/create-token").await.is_empty());

    verify_captcha(&app, &cookie).await?;
    let response = app
        .oneshot(post_form("/getkey/provider/adfly", &cookie, "")?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(calls_to(&calls, "/api/create-token").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn login_redirects_to_backend_entry_point() -> Result<()> {
    let (addr, _calls, _handle) = start_backend_stub(StubBehavior::default()).await?;
    let app = build_router(test_config(std::env::temp_dir(), addr))?;

    let response = app
        .oneshot(get_request("/login", &format!("kg_visitor={}", new_visitor()))?)
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        Some(format!("http://{addr}/auth/discord"))
    );
    Ok(())
}

#[tokio::test]
async fn login_reports_unreachable_backend() -> Result<()> {
    let app = build_router(Config::for_tests(std::env::temp_dir()))?;
    let cookie = format!("kg_visitor={}", new_visitor());

    let response = app.clone().oneshot(get_request("/login", &cookie)?).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/"));

    let response = app.oneshot(get_request("/", &cookie)?).await?;
    let body = read_text(response).await?;
    assert!(body.contains("Unable to start Discord login"));
    Ok(())
}

#[tokio::test]
async fn logout_relays_backend_cookies_and_resets_view() -> Result<()> {
    let (app, calls) = test_app(StubBehavior::default()).await?;
    let cookie = signed_in_cookie(&new_visitor());
    verify_captcha(&app, &cookie).await?;

    let response = app.clone().oneshot(post_form("/logout", &cookie, "")?).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/"));
    let relayed = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with("connect.sid=;"));
    assert!(relayed);
    assert_eq!(calls_to(&calls, "/auth/logout").await.len(), 1);

    let response = app.clone().oneshot(get_request("/", &cookie)?).await?;
    let body = read_text(response).await?;
    assert!(body.contains("Logged out successfully"));

    let response = app.oneshot(get_request("/getkey", &cookie)?).await?;
    let body = read_text(response).await?;
    assert!(body.contains("cf-turnstile"));
    Ok(())
}

struct SlowKeyBackend {
    generate_calls: Arc<Mutex<u32>>,
}

#[async_trait]
impl KeyBackend for SlowKeyBackend {
    async fn session(&self, _credentials: &BackendCredentials) -> Result<Session, BackendError> {
        Ok(Session::default())
    }

    async fn check_login(&self, _credentials: &BackendCredentials) -> Result<(), BackendError> {
        Ok(())
    }

    async fn logout(
        &self,
        _credentials: &BackendCredentials,
    ) -> Result<LogoutOutcome, BackendError> {
        Ok(LogoutOutcome::default())
    }

    async fn check_key(
        &self,
        _credentials: &BackendCredentials,
        _user_id: &str,
    ) -> Result<CheckKeyResponse, BackendError> {
        Ok(CheckKeyResponse::default())
    }

    async fn key_expiry(
        &self,
        _credentials: &BackendCredentials,
        _key: &str,
    ) -> Result<KeyExpiryResponse, BackendError> {
        Ok(KeyExpiryResponse::default())
    }

    async fn verify_captcha(
        &self,
        _credentials: &BackendCredentials,
        _token: &str,
    ) -> Result<VerifyCaptchaResponse, BackendError> {
        Ok(VerifyCaptchaResponse::default())
    }

    async fn create_token(
        &self,
        _credentials: &BackendCredentials,
    ) -> Result<CreateTokenResponse, BackendError> {
        Ok(CreateTokenResponse::default())
    }

    async fn encrypt_link(
        &self,
        _credentials: &BackendCredentials,
        _destination_url: &str,
    ) -> Result<EncryptLinkResponse, BackendError> {
        Ok(EncryptLinkResponse::default())
    }

    async fn generate_key(
        &self,
        _credentials: &BackendCredentials,
        _token: &str,
        _discord_id: &str,
    ) -> Result<GenerateKeyResponse, BackendError> {
        *self.generate_calls.lock().await += 1;
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        Ok(GenerateKeyResponse {
            success: true,
            message: None,
        })
    }
}

#[tokio::test]
async fn ad_gateway_callback_completes_after_browser_disconnects() -> Result<()> {
    let generate_calls = Arc::new(Mutex::new(0));
    let backend = SlowKeyBackend {
        generate_calls: generate_calls.clone(),
    };
    let app = build_router_with_backend(
        Config::for_tests(std::env::temp_dir()),
        Arc::new(backend),
    );
    let cookie = format!("kg_visitor={}", new_visitor());
    let uri = format!("/getkey/lootlabs-callback?token=tok_slow&discord_id={STUB_USER_ID}");

    let first = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        app.clone().oneshot(get_request(&uri, &cookie)?),
    )
    .await;
    assert!(first.is_err());

    tokio::time::sleep(std::time::Duration::from_millis(600)).await;

    let second = app.clone().oneshot(get_request(&uri, &cookie)?).await?;
    assert_eq!(second.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&second).as_deref(), Some("/getkey"));
    assert_eq!(*generate_calls.lock().await, 1);

    let response = app.oneshot(get_request("/", &cookie)?).await?;
    let body = read_text(response).await?;
    assert!(body.contains("Key generated successfully!"));
    Ok(())
}
