use serde::{Deserialize, Serialize};

pub const ROUTE_AUTH_SESSION: &str = "/auth/session";
pub const ROUTE_AUTH_DISCORD: &str = "/auth/discord";
pub const ROUTE_AUTH_CALLBACK: &str = "/auth/callback";
pub const ROUTE_AUTH_LOGOUT: &str = "/auth/logout";

/// Header carrying the shared secret on every backend call.
pub const SHARED_SECRET_HEADER: &str = "x-secret";

const DISCORD_CDN_BASE_URL: &str = "https://cdn.discordapp.com";
const DISCORD_DEFAULT_AVATAR_COUNT: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientInputError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
}

/// Identity record mirrored from the backend session endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
}

impl Session {
    /// A session only counts as authenticated when the backend named a user id.
    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user
            .as_ref()
            .and_then(|user| user.id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

impl SessionUser {
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("User")
    }

    pub fn initials(&self) -> String {
        self.username
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(2)
            .collect::<String>()
            .to_uppercase()
    }

    /// Discord CDN avatar. Animated hashes (`a_` prefix) are served as gif.
    pub fn avatar_url(&self) -> String {
        let avatar = self
            .avatar
            .as_deref()
            .map(str::trim)
            .filter(|avatar| !avatar.is_empty());
        let id = self.id.as_deref().map(str::trim).unwrap_or_default();

        if let Some(avatar) = avatar {
            let format = if avatar.starts_with("a_") { "gif" } else { "webp" };
            return format!("{DISCORD_CDN_BASE_URL}/avatars/{id}/{avatar}.{format}");
        }

        let index = self
            .discriminator
            .as_deref()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0)
            % DISCORD_DEFAULT_AVATAR_COUNT;
        format!("{DISCORD_CDN_BASE_URL}/embed/avatars/{index}.png")
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String, ClientInputError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientInputError::EmptyBaseUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ClientInputError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(ClientInputError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ClientInputError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}
