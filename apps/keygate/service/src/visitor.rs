//! Per-visitor view state.
//!
//! Everything the dashboard needs to remember between requests lives here,
//! keyed by an opaque id carried in an HttpOnly cookie. The backend stays the
//! authority for sessions and keys; this store only remembers what was last
//! shown to the browser.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::AppState;
use crate::notice::Notice;

pub const VISITOR_COOKIE_NAME: &str = "kg_visitor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisitorId(Uuid);

impl VisitorId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        crate::extract_cookie_value(headers, VISITOR_COOKIE_NAME)
            .and_then(|value| Uuid::parse_str(&value).ok())
            .map(Self)
    }

    fn cookie(self, max_age_seconds: u64) -> String {
        format!(
            "{VISITOR_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}",
            self.0.simple()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CaptchaState {
    #[default]
    Unverified,
    /// Verified by the backend for this user id only.
    Verified { user_id: String },
}

impl CaptchaState {
    pub fn is_verified_for(&self, user_id: &str) -> bool {
        matches!(self, Self::Verified { user_id: verified } if verified == user_id)
    }
}

/// One-shot notice guard. Fires once, then stays shown for the visitor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NoticeGate {
    #[default]
    Pending,
    Shown,
}

impl NoticeGate {
    pub fn fire(&mut self) -> bool {
        match self {
            Self::Pending => {
                *self = Self::Shown;
                true
            }
            Self::Shown => false,
        }
    }
}

/// Last key the backend vouched for, possibly stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySnapshot {
    pub user_id: String,
    pub key: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct VisitorState {
    pub captcha: CaptchaState,
    pub key: Option<KeySnapshot>,
    pub notices: VecDeque<Notice>,
    pub auth_error_notice: NoticeGate,
    last_seen: Instant,
}

impl VisitorState {
    fn new(now: Instant) -> Self {
        Self {
            captcha: CaptchaState::Unverified,
            key: None,
            notices: VecDeque::new(),
            auth_error_notice: NoticeGate::Pending,
            last_seen: now,
        }
    }

    pub fn key_for(&self, user_id: &str) -> Option<&KeySnapshot> {
        self.key.as_ref().filter(|snapshot| snapshot.user_id == user_id)
    }
}

#[derive(Clone)]
pub struct VisitorStore {
    entries: Arc<Mutex<HashMap<VisitorId, VisitorState>>>,
    ttl: Duration,
}

impl VisitorStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Runs `apply` against the visitor's state, creating it on first use.
    pub async fn update<R>(&self, id: VisitorId, apply: impl FnOnce(&mut VisitorState) -> R) -> R {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let ttl = self.ttl;
        entries.retain(|_, state| now.duration_since(state.last_seen) < ttl);
        let state = entries.entry(id).or_insert_with(|| VisitorState::new(now));
        state.last_seen = now;
        apply(state)
    }

    pub async fn snapshot(&self, id: VisitorId) -> VisitorState {
        self.update(id, |state| state.clone()).await
    }

    pub async fn push_notice(&self, id: VisitorId, notice: Notice) {
        self.update(id, |state| state.notices.push_back(notice)).await;
    }

    pub async fn drain_notices(&self, id: VisitorId) -> Vec<Notice> {
        self.update(id, |state| state.notices.drain(..).collect())
            .await
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Visitor id resolved by [`visitor_gate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentVisitor(pub VisitorId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentVisitor {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<VisitorId>() {
            Some(id) => Ok(Self(*id)),
            None => {
                tracing::error!(path = %parts.uri.path(), "visitor layer is not mounted for route");
                Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
        }
    }
}

pub(crate) async fn visitor_gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let existing = VisitorId::from_headers(request.headers());
    let id = existing.unwrap_or_else(VisitorId::generate);
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    if existing.is_none() {
        let cookie = id.cookie(state.config.visitor_ttl_seconds);
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(error) => {
                tracing::warn!(%error, "failed to encode visitor cookie");
            }
        }
    }
    response
}
