//! Landing routes for redirects coming back from the identity provider and
//! the ad gateways.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::form_urlencoded::byte_serialize;

use keygate_client_core::auth::ROUTE_AUTH_CALLBACK;

use crate::backend::BackendCredentials;
use crate::notice::Notice;
use crate::render::page_response;
use crate::visitor::{CurrentVisitor, VisitorId};
use crate::web_htmx::navigate;
use crate::web_maud::{TimedRedirect, WebBody, WebPage};
use crate::{AppState, non_empty, request_id};

pub const AUTH_MISSING_CODE_MESSAGE: &str =
    "Authentication failed: No authorization code provided.";
pub const INVALID_CALLBACK_MESSAGE: &str = "Invalid callback parameters";
pub const INVALID_REQUEST_NOTICE: &str = "Invalid request";
pub const KEY_GENERATED_NOTICE: &str = "Key generated successfully!";
pub const KEY_FAILED_NOTICE: &str = "Failed to generate key";
const KEY_FAILED_FALLBACK_MESSAGE: &str = "An error occurred";
const IN_FLIGHT_REFRESH_SECONDS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Generated,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackClaim {
    /// Caller owns the token and must record an outcome.
    Claimed,
    InFlight,
    Completed(CallbackOutcome),
}

#[derive(Debug, Clone)]
enum LedgerState {
    InFlight,
    Completed(CallbackOutcome),
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    state: LedgerState,
    touched_at: Instant,
}

/// Tokens already handed to the key-generation endpoint.
#[derive(Clone)]
pub struct CallbackLedger {
    entries: Arc<Mutex<HashMap<String, LedgerEntry>>>,
    ttl: Duration,
}

impl CallbackLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn claim(&self, token: &str) -> CallbackClaim {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| now.duration_since(entry.touched_at) < ttl);

        if let Some(entry) = entries.get(token) {
            return match &entry.state {
                LedgerState::InFlight => CallbackClaim::InFlight,
                LedgerState::Completed(outcome) => CallbackClaim::Completed(outcome.clone()),
            };
        }

        entries.insert(
            token.to_string(),
            LedgerEntry {
                state: LedgerState::InFlight,
                touched_at: now,
            },
        );
        CallbackClaim::Claimed
    }

    pub async fn complete(&self, token: &str, outcome: CallbackOutcome) {
        self.entries.lock().await.insert(
            token.to_string(),
            LedgerEntry {
                state: LedgerState::Completed(outcome),
                touched_at: Instant::now(),
            },
        );
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IdentityCallbackQuery {
    code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GatewayCallbackQuery {
    token: Option<String>,
    discord_id: Option<String>,
}

pub(crate) async fn identity_callback(
    State(state): State<AppState>,
    CurrentVisitor(visitor): CurrentVisitor,
    headers: HeaderMap,
    Query(query): Query<IdentityCallbackQuery>,
) -> Response {
    if let Some(code) = query.code.and_then(non_empty) {
        let encoded = byte_serialize(code.as_bytes()).collect::<String>();
        let location = format!(
            "{}{ROUTE_AUTH_CALLBACK}?code={encoded}",
            state.config.api_base_url
        );
        return navigate(&headers, &location);
    }

    let first_time = state
        .visitors
        .update(visitor, |visitor_state| visitor_state.auth_error_notice.fire())
        .await;
    if first_time {
        tracing::warn!(request_id = %request_id(&headers), "identity callback without authorization code");
    }

    let notices = if first_time {
        vec![Notice::error(AUTH_MISSING_CODE_MESSAGE)]
    } else {
        Vec::new()
    };

    let page = WebPage::new("Signing in", WebBody::Loading)
        .with_notices(notices)
        .with_redirect(Some(TimedRedirect {
            seconds: state.config.auth_error_redirect_seconds,
            location: "/".to_string(),
        }));
    page_response(&state, StatusCode::OK, page)
}

pub(crate) async fn ad_gateway_callback(
    State(state): State<AppState>,
    CurrentVisitor(visitor): CurrentVisitor,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<GatewayCallbackQuery>,
) -> Response {
    let request_id = request_id(&headers);
    let token = query.token.and_then(non_empty);
    let discord_id = query.discord_id.and_then(non_empty);

    let (Some(token), Some(discord_id)) = (token, discord_id) else {
        tracing::warn!(%request_id, path = %uri.path(), "ad-gateway callback missing token or discord_id");
        return failure_page(
            &state,
            INVALID_CALLBACK_MESSAGE,
            Notice::error(INVALID_REQUEST_NOTICE),
        );
    };

    let outcome = match state.callbacks.claim(&token).await {
        CallbackClaim::Claimed => {
            let credentials = BackendCredentials::from_headers(&headers);
            generate_key(&state, visitor, credentials, token, discord_id, request_id).await
        }
        CallbackClaim::InFlight => {
            tracing::debug!(%request_id, "ad-gateway callback already in flight");
            let location = uri
                .path_and_query()
                .map(|value| value.as_str().to_string())
                .unwrap_or_else(|| uri.path().to_string());
            let page = WebPage::new("Generating key", WebBody::Loading).with_redirect(Some(
                TimedRedirect {
                    seconds: IN_FLIGHT_REFRESH_SECONDS,
                    location,
                },
            ));
            return page_response(&state, StatusCode::OK, page);
        }
        CallbackClaim::Completed(outcome) => {
            tracing::info!(%request_id, "ad-gateway callback replayed without backend call");
            outcome
        }
    };

    match outcome {
        CallbackOutcome::Generated => navigate(&headers, "/getkey"),
        CallbackOutcome::Failed { message } => {
            failure_page(&state, &message, Notice::error(KEY_FAILED_NOTICE))
        }
    }
}

/// Calls the key-generation endpoint and records the outcome on a detached
/// task, so a dropped browser connection cannot strand the token in flight.
async fn generate_key(
    state: &AppState,
    visitor: VisitorId,
    credentials: BackendCredentials,
    token: String,
    discord_id: String,
    request_id: String,
) -> CallbackOutcome {
    let task_state = state.clone();
    let task = tokio::spawn(async move {
        let outcome = match task_state
            .backend
            .generate_key(&credentials, &token, &discord_id)
            .await
        {
            Ok(response) if response.success => CallbackOutcome::Generated,
            Ok(response) => CallbackOutcome::Failed {
                message: response
                    .message
                    .and_then(non_empty)
                    .unwrap_or_else(|| KEY_FAILED_NOTICE.to_string()),
            },
            Err(error) => {
                tracing::warn!(%request_id, %error, "key generation request failed");
                CallbackOutcome::Failed {
                    message: error
                        .backend_message()
                        .unwrap_or_else(|| KEY_FAILED_FALLBACK_MESSAGE.to_string()),
                }
            }
        };

        if outcome == CallbackOutcome::Generated {
            tracing::info!(%request_id, %discord_id, "key generated from ad-gateway callback");
            task_state
                .visitors
                .push_notice(visitor, Notice::success(KEY_GENERATED_NOTICE))
                .await;
        }
        task_state.callbacks.complete(&token, outcome.clone()).await;
        outcome
    });

    match task.await {
        Ok(outcome) => outcome,
        Err(error) => {
            tracing::error!(%error, "key generation task aborted");
            CallbackOutcome::Failed {
                message: KEY_FAILED_FALLBACK_MESSAGE.to_string(),
            }
        }
    }
}

fn failure_page(state: &AppState, message: &str, notice: Notice) -> Response {
    let page = WebPage::new(
        "Error",
        WebBody::CallbackError {
            message: message.to_string(),
        },
    )
    .with_notices(vec![notice])
    .with_redirect(Some(TimedRedirect {
        seconds: state.config.callback_error_redirect_seconds,
        location: "/".to_string(),
    }));
    page_response(state, StatusCode::OK, page)
}
