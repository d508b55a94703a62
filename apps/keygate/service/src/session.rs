use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use keygate_client_core::{Session, SessionUser};

use crate::AppState;
use crate::backend::{BackendCredentials, BackendError, KeyBackend, LogoutOutcome};

#[derive(Clone)]
pub struct SessionClient {
    backend: Arc<dyn KeyBackend>,
}

impl SessionClient {
    pub fn new(backend: Arc<dyn KeyBackend>) -> Self {
        Self { backend }
    }

    /// Resolves the visitor's backend session. Failures read as anonymous.
    pub async fn check_session(&self, credentials: &BackendCredentials) -> Option<Session> {
        match self.backend.session(credentials).await {
            Ok(session) if session.is_authenticated() => Some(session),
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(%error, "session check failed");
                None
            }
        }
    }

    pub async fn login(&self, credentials: &BackendCredentials) -> Result<(), BackendError> {
        self.backend.check_login(credentials).await
    }

    pub async fn logout(
        &self,
        credentials: &BackendCredentials,
    ) -> Result<LogoutOutcome, BackendError> {
        self.backend.logout(credentials).await
    }
}

/// Session resolved once per request and handed to handlers explicitly.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session: Option<Session>,
    pub credentials: BackendCredentials,
}

impl SessionContext {
    pub fn user(&self) -> Option<&SessionUser> {
        self.session.as_ref().and_then(|session| session.user.as_ref())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().and_then(Session::user_id)
    }
}

pub struct CurrentSession(pub SessionContext);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentSession {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<SessionContext>() {
            Some(context) => Ok(Self(context.clone())),
            None => {
                tracing::error!(path = %parts.uri.path(), "session layer is not mounted for route");
                Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
        }
    }
}

pub(crate) async fn session_gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let credentials = BackendCredentials::from_headers(request.headers());
    let session = state.sessions.check_session(&credentials).await;
    request.extensions_mut().insert(SessionContext {
        session,
        credentials,
    });
    next.run(request).await
}
