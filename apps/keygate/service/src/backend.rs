use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::{COOKIE, SET_COOKIE};
use keygate_client_core::Session;
use keygate_client_core::auth::{
    ROUTE_AUTH_DISCORD, ROUTE_AUTH_LOGOUT, ROUTE_AUTH_SESSION, SHARED_SECRET_HEADER,
};
use keygate_client_core::keys::{
    CheckKeyResponse, CreateTokenResponse, EncryptLinkRequest, EncryptLinkResponse,
    GenerateKeyRequest, GenerateKeyResponse, KeyExpiryRequest, KeyExpiryResponse,
    ROUTE_CHECK_KEY, ROUTE_CREATE_TOKEN, ROUTE_ENCRYPT_LINK, ROUTE_GENERATE_KEY,
    ROUTE_KEY_EXPIRY, ROUTE_VERIFY_TURNSTILE, VerifyCaptchaRequest, VerifyCaptchaResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Config;

/// Browser credentials relayed to the backend so it can bind its own session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCredentials {
    pub cookie: Option<String>,
}

impl BackendCredentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let cookie = headers
            .get(COOKIE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Self { cookie }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unable to build key backend client: {message}")]
    Client { message: String },
    #[error("unable to contact key backend for {route}: {message}")]
    Transport { route: &'static str, message: String },
    #[error("key backend rejected {route} ({status}): {body}")]
    Status {
        route: &'static str,
        status: u16,
        body: String,
    },
    #[error("invalid key backend payload from {route}: {message}")]
    Payload { route: &'static str, message: String },
}

impl BackendError {
    /// Human readable message the backend attached to a rejection, if any.
    pub fn backend_message(&self) -> Option<String> {
        let Self::Status { body, .. } = self else {
            return None;
        };
        serde_json::from_str::<serde_json::Value>(body)
            .ok()?
            .get("message")?
            .as_str()
            .map(|message| message.trim().to_string())
            .filter(|message| !message.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutOutcome {
    /// `Set-Cookie` values the backend emitted, relayed to the browser verbatim.
    pub set_cookies: Vec<String>,
}

#[async_trait]
pub trait KeyBackend: Send + Sync {
    async fn session(&self, credentials: &BackendCredentials) -> Result<Session, BackendError>;

    async fn check_login(&self, credentials: &BackendCredentials) -> Result<(), BackendError>;

    async fn logout(&self, credentials: &BackendCredentials)
    -> Result<LogoutOutcome, BackendError>;

    async fn check_key(
        &self,
        credentials: &BackendCredentials,
        user_id: &str,
    ) -> Result<CheckKeyResponse, BackendError>;

    async fn key_expiry(
        &self,
        credentials: &BackendCredentials,
        key: &str,
    ) -> Result<KeyExpiryResponse, BackendError>;

    async fn verify_captcha(
        &self,
        credentials: &BackendCredentials,
        token: &str,
    ) -> Result<VerifyCaptchaResponse, BackendError>;

    async fn create_token(
        &self,
        credentials: &BackendCredentials,
    ) -> Result<CreateTokenResponse, BackendError>;

    async fn encrypt_link(
        &self,
        credentials: &BackendCredentials,
        destination_url: &str,
    ) -> Result<EncryptLinkResponse, BackendError>;

    async fn generate_key(
        &self,
        credentials: &BackendCredentials,
        token: &str,
        discord_id: &str,
    ) -> Result<GenerateKeyResponse, BackendError>;
}

#[derive(Debug, Clone)]
pub struct HttpKeyBackend {
    base_url: String,
    shared_secret: Option<String>,
    http: reqwest::Client,
}

impl HttpKeyBackend {
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.backend_timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|error| BackendError::Client {
                message: error.to_string(),
            })?;

        Ok(Self {
            base_url: config.api_base_url.clone(),
            shared_secret: config.api_shared_secret.clone(),
            http,
        })
    }

    fn url(&self, route: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            route.trim_start_matches('/')
        )
    }

    fn authorize(
        &self,
        builder: reqwest::RequestBuilder,
        credentials: &BackendCredentials,
    ) -> reqwest::RequestBuilder {
        let builder = match self.shared_secret.as_deref() {
            Some(secret) => builder.header(SHARED_SECRET_HEADER, secret),
            None => builder,
        };
        match credentials.cookie.as_deref() {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    async fn send(
        &self,
        route: &'static str,
        builder: reqwest::RequestBuilder,
        credentials: &BackendCredentials,
    ) -> Result<reqwest::Response, BackendError> {
        let response = self
            .authorize(builder, credentials)
            .send()
            .await
            .map_err(|error| BackendError::Transport {
                route,
                message: error.to_string(),
            })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            route,
            status,
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(
        route: &'static str,
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        response
            .json::<T>()
            .await
            .map_err(|error| BackendError::Payload {
                route,
                message: error.to_string(),
            })
    }

    async fn post_json<T: DeserializeOwned, P: Serialize + Sync>(
        &self,
        route: &'static str,
        credentials: &BackendCredentials,
        payload: &P,
    ) -> Result<T, BackendError> {
        let builder = self.http.post(self.url(route)).json(payload);
        let response = self.send(route, builder, credentials).await?;
        Self::decode(route, response).await
    }
}

#[async_trait]
impl KeyBackend for HttpKeyBackend {
    async fn session(&self, credentials: &BackendCredentials) -> Result<Session, BackendError> {
        let builder = self.http.get(self.url(ROUTE_AUTH_SESSION));
        let response = self.send(ROUTE_AUTH_SESSION, builder, credentials).await?;
        Self::decode(ROUTE_AUTH_SESSION, response).await
    }

    async fn check_login(&self, credentials: &BackendCredentials) -> Result<(), BackendError> {
        let response = self
            .authorize(self.http.get(self.url(ROUTE_AUTH_DISCORD)), credentials)
            .send()
            .await
            .map_err(|error| BackendError::Transport {
                route: ROUTE_AUTH_DISCORD,
                message: error.to_string(),
            })?;

        // The entry point answers with a redirect to the identity provider.
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            route: ROUTE_AUTH_DISCORD,
            status: status.as_u16(),
            body,
        })
    }

    async fn logout(
        &self,
        credentials: &BackendCredentials,
    ) -> Result<LogoutOutcome, BackendError> {
        let builder = self.http.post(self.url(ROUTE_AUTH_LOGOUT));
        let response = self.send(ROUTE_AUTH_LOGOUT, builder, credentials).await?;
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(ToString::to_string)
            .collect();
        Ok(LogoutOutcome { set_cookies })
    }

    async fn check_key(
        &self,
        credentials: &BackendCredentials,
        user_id: &str,
    ) -> Result<CheckKeyResponse, BackendError> {
        let builder = self
            .http
            .get(self.url(ROUTE_CHECK_KEY))
            .query(&[("discord_id", user_id)]);
        let response = self.send(ROUTE_CHECK_KEY, builder, credentials).await?;
        Self::decode(ROUTE_CHECK_KEY, response).await
    }

    async fn key_expiry(
        &self,
        credentials: &BackendCredentials,
        key: &str,
    ) -> Result<KeyExpiryResponse, BackendError> {
        self.post_json(
            ROUTE_KEY_EXPIRY,
            credentials,
            &KeyExpiryRequest {
                key: key.to_string(),
            },
        )
        .await
    }

    async fn verify_captcha(
        &self,
        credentials: &BackendCredentials,
        token: &str,
    ) -> Result<VerifyCaptchaResponse, BackendError> {
        self.post_json(
            ROUTE_VERIFY_TURNSTILE,
            credentials,
            &VerifyCaptchaRequest {
                token: token.to_string(),
            },
        )
        .await
    }

    async fn create_token(
        &self,
        credentials: &BackendCredentials,
    ) -> Result<CreateTokenResponse, BackendError> {
        let builder = self.http.post(self.url(ROUTE_CREATE_TOKEN));
        let response = self.send(ROUTE_CREATE_TOKEN, builder, credentials).await?;
        Self::decode(ROUTE_CREATE_TOKEN, response).await
    }

    async fn encrypt_link(
        &self,
        credentials: &BackendCredentials,
        destination_url: &str,
    ) -> Result<EncryptLinkResponse, BackendError> {
        self.post_json(
            ROUTE_ENCRYPT_LINK,
            credentials,
            &EncryptLinkRequest {
                destination_url: destination_url.to_string(),
            },
        )
        .await
    }

    async fn generate_key(
        &self,
        credentials: &BackendCredentials,
        token: &str,
        discord_id: &str,
    ) -> Result<GenerateKeyResponse, BackendError> {
        self.post_json(
            ROUTE_GENERATE_KEY,
            credentials,
            &GenerateKeyRequest {
                token: token.to_string(),
                discord_id: discord_id.to_string(),
            },
        )
        .await
    }
}
