//! Key dashboard: view selection, key status, CAPTCHA gate and the outbound
//! ad-gateway link flow.

use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use url::Url;

use keygate_client_core::gateway::gateway_for;
use keygate_client_core::{
    AdGatewayProvider, GatewayError, ProviderLink, parse_expiry, remaining_label,
};

use crate::backend::BackendCredentials;
use crate::notice::Notice;
use crate::render::{countdown_response, page_response, user_view};
use crate::session::CurrentSession;
use crate::visitor::{CaptchaState, CurrentVisitor, KeySnapshot, VisitorId};
use crate::web_htmx::navigate;
use crate::web_maud::{
    DashboardPanel, DashboardView, WebBody, WebPage, render_countdown_fragment,
    render_countdown_placeholder,
};
use crate::{AppState, not_found_response};

pub const CAPTCHA_PROMPT_NO_KEY: &str = "Complete verification to continue";
pub const CAPTCHA_PROMPT_WITH_KEY: &str = "Verify to reveal your key";
pub const CAPTCHA_REJECTED_NOTICE: &str = "CAPTCHA verification failed. Please try again.";
pub const CAPTCHA_UNAVAILABLE_NOTICE: &str = "Unable to verify the CAPTCHA right now.";
pub const TOKEN_FAILED_NOTICE: &str = "Failed to create token.";
pub const ENCRYPTION_FAILED_NOTICE: &str = "An error occurred during encryption.";
pub const GATEWAY_FAILED_NOTICE: &str = "Unable to build the provider link.";
const PICKER_OPEN: &str = "open";

#[derive(Debug, thiserror::Error)]
pub enum ProviderLinkError {
    #[error("token creation failed: {message}")]
    TokenCreation { message: String },
    #[error("link encryption failed: {message}")]
    Encryption { message: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ProviderLinkError {
    pub fn notice_message(&self) -> &'static str {
        match self {
            Self::TokenCreation { .. } => TOKEN_FAILED_NOTICE,
            Self::Encryption { .. } | Self::Gateway(GatewayError::MissingPayload) => {
                ENCRYPTION_FAILED_NOTICE
            }
            Self::Gateway(_) => GATEWAY_FAILED_NOTICE,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DashboardQuery {
    picker: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    meg: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct VerifyCaptchaForm {
    #[serde(rename = "cf-turnstile-response")]
    token: Option<String>,
}

/// Which dashboard panel a visitor may see. The key only appears once verified.
pub fn select_panel(
    key: Option<&KeySnapshot>,
    captcha_verified: bool,
    now: DateTime<Utc>,
) -> DashboardPanel {
    match (key, captcha_verified) {
        (None, false) => DashboardPanel::Captcha {
            prompt: CAPTCHA_PROMPT_NO_KEY,
        },
        (None, true) => DashboardPanel::GetKey,
        (Some(_), false) => DashboardPanel::Captcha {
            prompt: CAPTCHA_PROMPT_WITH_KEY,
        },
        (Some(snapshot), true) => DashboardPanel::Key {
            key: snapshot.key.clone(),
            time_left: snapshot
                .expires_at
                .map(|expires_at| remaining_label(expires_at, now)),
            expires_at: snapshot.expires_at.map(expiry_attribute),
        },
    }
}

pub(crate) async fn dashboard_page(
    State(state): State<AppState>,
    CurrentVisitor(visitor): CurrentVisitor,
    CurrentSession(context): CurrentSession,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let Some(user_id) = context.user_id().map(ToString::to_string) else {
        return navigate(&headers, "/");
    };

    let key = check_key(&state, visitor, &context.credentials, &user_id).await;
    let verified = captcha_verified(&state, visitor, &user_id).await;
    let panel = select_panel(key.as_ref(), verified, Utc::now());

    let mut notices = Notice::from_query(query.kind.as_deref(), query.meg.as_deref())
        .into_iter()
        .collect::<Vec<_>>();
    notices.extend(state.visitors.drain_notices(visitor).await);

    let page = WebPage::new(
        "Get Key",
        WebBody::Dashboard(DashboardView {
            panel,
            picker_open: query.picker.as_deref() == Some(PICKER_OPEN),
            turnstile_site_key: state.config.turnstile_site_key.clone(),
        }),
    )
    .with_user(user_view(&context))
    .with_notices(notices);
    page_response(&state, StatusCode::OK, page)
}

pub(crate) async fn countdown_fragment(
    State(state): State<AppState>,
    CurrentVisitor(visitor): CurrentVisitor,
    CurrentSession(context): CurrentSession,
) -> Response {
    let Some(user_id) = context.user_id().map(ToString::to_string) else {
        return countdown_response(render_countdown_placeholder());
    };
    if !captcha_verified(&state, visitor, &user_id).await {
        return countdown_response(render_countdown_placeholder());
    }

    let snapshot = state.visitors.snapshot(visitor).await;
    let Some(key) = snapshot.key_for(&user_id).cloned() else {
        return countdown_response(render_countdown_placeholder());
    };

    let expires_at = match key.expires_at {
        Some(expires_at) => Some(expires_at),
        None => fetch_expiry(&state, visitor, &context.credentials, &key).await,
    };
    let label = expires_at.map(|expires_at| remaining_label(expires_at, Utc::now()));
    let attribute = expires_at.map(expiry_attribute);
    countdown_response(render_countdown_fragment(
        label.as_deref(),
        attribute.as_deref(),
    ))
}

fn expiry_attribute(expires_at: DateTime<Utc>) -> String {
    expires_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) async fn verify_captcha(
    State(state): State<AppState>,
    CurrentVisitor(visitor): CurrentVisitor,
    CurrentSession(context): CurrentSession,
    headers: HeaderMap,
    Form(form): Form<VerifyCaptchaForm>,
) -> Response {
    let Some(user_id) = context.user_id().map(ToString::to_string) else {
        return navigate(&headers, "/");
    };

    let Some(token) = form
        .token
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        state
            .visitors
            .push_notice(visitor, Notice::error(CAPTCHA_REJECTED_NOTICE))
            .await;
        return navigate(&headers, "/getkey");
    };

    match state
        .backend
        .verify_captcha(&context.credentials, &token)
        .await
    {
        Ok(verdict) if verdict.success => {
            state
                .visitors
                .update(visitor, |visitor_state| {
                    visitor_state.captcha = CaptchaState::Verified { user_id };
                })
                .await;
        }
        Ok(_) => {
            tracing::info!("captcha rejected by backend");
            state
                .visitors
                .update(visitor, |visitor_state| {
                    visitor_state.captcha = CaptchaState::Unverified;
                    visitor_state
                        .notices
                        .push_back(Notice::error(CAPTCHA_REJECTED_NOTICE));
                })
                .await;
        }
        Err(error) => {
            tracing::warn!(%error, "captcha verification request failed");
            state
                .visitors
                .push_notice(visitor, Notice::error(CAPTCHA_UNAVAILABLE_NOTICE))
                .await;
        }
    }

    navigate(&headers, "/getkey")
}

pub(crate) async fn provider_redirect(
    State(state): State<AppState>,
    CurrentVisitor(visitor): CurrentVisitor,
    CurrentSession(context): CurrentSession,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> Response {
    let Ok(provider) = provider.parse::<AdGatewayProvider>() else {
        return not_found_response(&state);
    };
    let Some(user_id) = context.user_id().map(ToString::to_string) else {
        return navigate(&headers, "/");
    };
    if !captcha_verified(&state, visitor, &user_id).await {
        state
            .visitors
            .push_notice(visitor, Notice::error(CAPTCHA_PROMPT_NO_KEY))
            .await;
        return navigate(&headers, "/getkey");
    }

    match request_provider_link(&state, &context.credentials, provider, &user_id).await {
        Ok(outbound) => {
            tracing::info!(provider = %provider, "redirecting to {}", provider.display_name());
            navigate(&headers, outbound.as_str())
        }
        Err(error) => {
            tracing::warn!(provider = %provider, %error, "provider link request failed");
            state
                .visitors
                .push_notice(visitor, Notice::error(error.notice_message()))
                .await;
            navigate(&headers, "/getkey")
        }
    }
}

/// Token, return URL, encrypted link, outbound URL. Any failing step aborts.
pub(crate) async fn request_provider_link(
    state: &AppState,
    credentials: &BackendCredentials,
    provider: AdGatewayProvider,
    user_id: &str,
) -> Result<Url, ProviderLinkError> {
    let token = state
        .backend
        .create_token(credentials)
        .await
        .map_err(|error| ProviderLinkError::TokenCreation {
            message: error.to_string(),
        })?
        .into_token()
        .ok_or_else(|| ProviderLinkError::TokenCreation {
            message: "backend did not issue a token".to_string(),
        })?;

    let return_url = provider.return_url(&state.config.frontend_base_url, &token, user_id)?;

    let encrypted_link = state
        .backend
        .encrypt_link(credentials, return_url.as_str())
        .await
        .map_err(|error| ProviderLinkError::Encryption {
            message: error.to_string(),
        })?
        .encrypted_link
        .unwrap_or_default();

    let gateway = gateway_for(provider, &state.config.gateways);
    let outbound = gateway.outbound_url(&ProviderLink {
        return_url,
        encrypted_link,
    })?;
    Ok(outbound)
}

async fn captcha_verified(state: &AppState, visitor: VisitorId, user_id: &str) -> bool {
    if state.config.captcha_bypass {
        return true;
    }
    state
        .visitors
        .update(visitor, |visitor_state| {
            visitor_state.captcha.is_verified_for(user_id)
        })
        .await
}

/// Refreshes the visitor's key from the backend. Errors keep the prior state.
async fn check_key(
    state: &AppState,
    visitor: VisitorId,
    credentials: &BackendCredentials,
    user_id: &str,
) -> Option<KeySnapshot> {
    match state.backend.check_key(credentials, user_id).await {
        Ok(response) => match response.into_valid_key() {
            Some(key) => {
                let mut snapshot = KeySnapshot {
                    user_id: user_id.to_string(),
                    key,
                    expires_at: None,
                };
                snapshot.expires_at = fetch_expiry(state, visitor, credentials, &snapshot).await;
                state
                    .visitors
                    .update(visitor, |visitor_state| {
                        visitor_state.key = Some(snapshot.clone());
                    })
                    .await;
                Some(snapshot)
            }
            None => {
                state
                    .visitors
                    .update(visitor, |visitor_state| visitor_state.key = None)
                    .await;
                None
            }
        },
        Err(error) => {
            tracing::warn!(%error, "key check failed, keeping previous key state");
            state
                .visitors
                .snapshot(visitor)
                .await
                .key_for(user_id)
                .cloned()
        }
    }
}

/// Fetches the expiry for `key`, falling back to the last stored value for the same key.
async fn fetch_expiry(
    state: &AppState,
    visitor: VisitorId,
    credentials: &BackendCredentials,
    key: &KeySnapshot,
) -> Option<DateTime<Utc>> {
    let previous = state
        .visitors
        .snapshot(visitor)
        .await
        .key
        .filter(|stored| stored.user_id == key.user_id && stored.key == key.key)
        .and_then(|stored| stored.expires_at);

    let fetched = match state.backend.key_expiry(credentials, &key.key).await {
        Ok(response) => {
            let parsed = response.expired_at.as_deref().and_then(parse_expiry);
            if parsed.is_none() {
                tracing::warn!(raw = ?response.expired_at, "backend returned an unusable key expiry");
            }
            parsed
        }
        Err(error) => {
            tracing::warn!(%error, "key expiry request failed");
            None
        }
    };

    let expires_at = fetched.or(previous);
    if expires_at.is_some() && expires_at != key.expires_at {
        state
            .visitors
            .update(visitor, |visitor_state| {
                if let Some(stored) = visitor_state.key.as_mut() {
                    if stored.user_id == key.user_id && stored.key == key.key {
                        stored.expires_at = expires_at;
                    }
                }
            })
            .await;
    }
    expires_at
}
