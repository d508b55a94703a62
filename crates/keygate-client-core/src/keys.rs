use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ROUTE_CHECK_KEY: &str = "/api/chack-key";
pub const ROUTE_KEY_EXPIRY: &str = "/api/expiredAt";
pub const ROUTE_VERIFY_TURNSTILE: &str = "/api/verify-turnstile";
pub const ROUTE_CREATE_TOKEN: &str = "/api/create-token";
pub const ROUTE_ENCRYPT_LINK: &str = "/api/encryptLink";
pub const ROUTE_GENERATE_KEY: &str = "/api/genkey-loot";

pub const EXPIRED_LABEL: &str = "Expired";

const MILLIS_PER_HOUR: i64 = 3_600_000;
const MILLIS_PER_MINUTE: i64 = 60_000;
const MILLIS_PER_SECOND: i64 = 1_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CheckKeyResponse {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub key: Option<String>,
}

impl CheckKeyResponse {
    /// The key the dashboard may hold, if the backend vouched for it.
    pub fn into_valid_key(self) -> Option<String> {
        if !self.valid {
            return None;
        }
        self.key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyExpiryRequest {
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KeyExpiryResponse {
    #[serde(default, rename = "expiredAt", alias = "expired_at")]
    pub expired_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyCaptchaRequest {
    pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerifyCaptchaResponse {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreateTokenResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
}

impl CreateTokenResponse {
    pub fn into_token(self) -> Option<String> {
        if !self.success {
            return None;
        }
        self.token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptLinkRequest {
    pub destination_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EncryptLinkResponse {
    #[serde(default, rename = "encryptedLink", alias = "encrypted_link")]
    pub encrypted_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateKeyRequest {
    pub token: String,
    pub discord_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenerateKeyResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|value| value.with_timezone(&Utc))
        .ok()
}

/// Human readable time left until `expires_at`, e.g. `1h 0m 0s`.
///
/// Once `now` reaches the expiry the label is exactly [`EXPIRED_LABEL`], so
/// no component is ever negative.
pub fn remaining_label(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (expires_at - now).num_milliseconds();
    if diff <= 0 {
        return EXPIRED_LABEL.to_string();
    }

    let hours = diff / MILLIS_PER_HOUR;
    let minutes = (diff % MILLIS_PER_HOUR) / MILLIS_PER_MINUTE;
    let seconds = (diff % MILLIS_PER_MINUTE) / MILLIS_PER_SECOND;
    format!("{hours}h {minutes}m {seconds}s")
}
