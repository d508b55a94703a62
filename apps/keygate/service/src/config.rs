use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use keygate_client_core::auth::{ClientInputError, normalize_base_url};
use keygate_client_core::gateway::{
    DEFAULT_LINKVERTISE_BASE_URL, DEFAULT_LINKVERTISE_USER_ID, DEFAULT_LOOTLABS_BASE_URL,
    DEFAULT_LOOTLABS_LINK_ID, GatewaySettings,
};
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8788";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOG_FORMAT: &str = "text";
const DEFAULT_STATIC_DIR: &str = "apps/keygate/service/static";
const DEFAULT_HTMX_ASSET_PATH: &str = "/assets/htmx-2.0.8.min.js";
const DEFAULT_SITE_TITLE: &str = "IJON KEY";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3001";
const DEFAULT_FRONTEND_BASE_URL: &str = "http://127.0.0.1:8788";
const DEFAULT_TURNSTILE_SITE_KEY: &str = "0x4AAAAAABOU1ZPskaa2l3MO";
const DEFAULT_CAPTCHA_BYPASS: bool = false;
const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_VISITOR_TTL_SECONDS: u64 = 1_800;
const DEFAULT_AUTH_ERROR_REDIRECT_SECONDS: u64 = 2;
const DEFAULT_CALLBACK_ERROR_REDIRECT_SECONDS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub static_dir: PathBuf,
    pub htmx_asset_path: String,
    pub site_title: String,
    pub api_base_url: String,
    pub frontend_base_url: String,
    pub api_shared_secret: Option<String>,
    pub turnstile_site_key: String,
    pub captcha_bypass: bool,
    pub gateways: GatewaySettings,
    pub backend_timeout_ms: u64,
    pub visitor_ttl_seconds: u64,
    pub auth_error_redirect_seconds: u64,
    pub callback_error_redirect_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid KEYGATE_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid {name} value '{value}': {source}")]
    InvalidBaseUrl {
        name: &'static str,
        value: String,
        source: ClientInputError,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("KEYGATE_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw.clone(),
                source,
            })?;

        let log_filter = env::var("KEYGATE_LOG_FILTER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_format = match env::var("KEYGATE_LOG_FORMAT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FORMAT.to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let static_dir = env::var("KEYGATE_STATIC_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR));

        let htmx_asset_path = env::var("KEYGATE_HTMX_ASSET_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_HTMX_ASSET_PATH.to_string());

        let site_title = env::var("KEYGATE_SITE_TITLE")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SITE_TITLE.to_string());

        let api_base_url = base_url_from_env("KEYGATE_API_BASE_URL", DEFAULT_API_BASE_URL)?;
        let frontend_base_url =
            base_url_from_env("KEYGATE_FRONTEND_BASE_URL", DEFAULT_FRONTEND_BASE_URL)?;

        let api_shared_secret = env::var("KEYGATE_API_SHARED_SECRET")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let turnstile_site_key = env::var("KEYGATE_TURNSTILE_SITE_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_TURNSTILE_SITE_KEY.to_string());

        let captcha_bypass = env::var("KEYGATE_CAPTCHA_BYPASS")
            .ok()
            .map(|value| parse_bool(&value))
            .unwrap_or(DEFAULT_CAPTCHA_BYPASS);

        let gateways = GatewaySettings {
            lootlabs_base_url: base_url_from_env(
                "KEYGATE_LOOTLABS_BASE_URL",
                DEFAULT_LOOTLABS_BASE_URL,
            )?,
            lootlabs_link_id: env::var("KEYGATE_LOOTLABS_LINK_ID")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_LOOTLABS_LINK_ID.to_string()),
            linkvertise_base_url: base_url_from_env(
                "KEYGATE_LINKVERTISE_BASE_URL",
                DEFAULT_LINKVERTISE_BASE_URL,
            )?,
            linkvertise_user_id: env::var("KEYGATE_LINKVERTISE_USER_ID")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_LINKVERTISE_USER_ID.to_string()),
        };

        let backend_timeout_ms = env::var("KEYGATE_BACKEND_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_BACKEND_TIMEOUT_MS);

        let visitor_ttl_seconds = env::var("KEYGATE_VISITOR_TTL_SECONDS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_VISITOR_TTL_SECONDS);

        let auth_error_redirect_seconds = env::var("KEYGATE_AUTH_ERROR_REDIRECT_SECONDS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_AUTH_ERROR_REDIRECT_SECONDS);

        let callback_error_redirect_seconds = env::var("KEYGATE_CALLBACK_ERROR_REDIRECT_SECONDS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_CALLBACK_ERROR_REDIRECT_SECONDS);

        Ok(Self {
            bind_addr,
            log_filter,
            log_format,
            static_dir,
            htmx_asset_path,
            site_title,
            api_base_url,
            frontend_base_url,
            api_shared_secret,
            turnstile_site_key,
            captcha_bypass,
            gateways,
            backend_timeout_ms,
            visitor_ttl_seconds,
            auth_error_redirect_seconds,
            callback_error_redirect_seconds,
        })
    }
}

#[cfg(test)]
impl Config {
    #[must_use]
    pub fn for_tests(static_dir: PathBuf) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            log_format: LogFormat::Text,
            static_dir,
            htmx_asset_path: DEFAULT_HTMX_ASSET_PATH.to_string(),
            site_title: DEFAULT_SITE_TITLE.to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            frontend_base_url: "https://key.keygate.test".to_string(),
            api_shared_secret: Some("keygate-test-secret".to_string()),
            turnstile_site_key: "1x00000000000000000000AA".to_string(),
            captcha_bypass: false,
            gateways: GatewaySettings::default(),
            backend_timeout_ms: 2_000,
            visitor_ttl_seconds: DEFAULT_VISITOR_TTL_SECONDS,
            auth_error_redirect_seconds: DEFAULT_AUTH_ERROR_REDIRECT_SECONDS,
            callback_error_redirect_seconds: DEFAULT_CALLBACK_ERROR_REDIRECT_SECONDS,
        }
    }
}

fn base_url_from_env(name: &'static str, default: &str) -> Result<String, ConfigError> {
    let raw = env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string());

    normalize_base_url(&raw).map_err(|source| ConfigError::InvalidBaseUrl {
        name,
        value: raw,
        source,
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}
