//! Ad-gateway link composition.
//!
//! Both providers receive a return URL pointing back at the matching callback
//! route; they differ only in how the outbound link carries it. LootLabs takes
//! the backend-encrypted payload as a query parameter, Linkvertise takes the
//! base64 of the return URL itself.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use url::Url;
use url::form_urlencoded::byte_serialize;

pub const ROUTE_LOOTLABS_CALLBACK: &str = "/getkey/lootlabs-callback";
pub const ROUTE_LOOTLABS_CALLBACK_ALIAS: &str = "/lootlabs-callback";
pub const ROUTE_LINKVERTISE_CALLBACK: &str = "/linkvertise-callback";

pub const DEFAULT_LOOTLABS_BASE_URL: &str = "https://lootdest.org";
pub const DEFAULT_LOOTLABS_LINK_ID: &str = "OEAFxRAD";
pub const DEFAULT_LINKVERTISE_BASE_URL: &str = "https://link-to.net";
pub const DEFAULT_LINKVERTISE_USER_ID: &str = "1162634";

const LINKVERTISE_NONCE_RANGE: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown ad-gateway provider '{0}'")]
    UnknownProvider(String),
    #[error("ad-gateway link is invalid: {message}")]
    InvalidUrl { message: String },
    #[error("backend returned an empty encrypted link")]
    MissingPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdGatewayProvider {
    LootLabs,
    Linkvertise,
}

impl AdGatewayProvider {
    pub const ALL: [Self; 2] = [Self::LootLabs, Self::Linkvertise];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LootLabs => "lootlabs",
            Self::Linkvertise => "linkvertise",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::LootLabs => "LootLabs",
            Self::Linkvertise => "Linkvertise",
        }
    }

    pub const fn logo_url(self) -> &'static str {
        match self {
            Self::LootLabs => "https://creators.lootlabs.gg/assets/svg/logo.svg",
            Self::Linkvertise => "https://linkvertise.com/favicon-96x96.png",
        }
    }

    /// Route on this site the provider sends the browser back to.
    pub const fn callback_path(self) -> &'static str {
        match self {
            Self::LootLabs => ROUTE_LOOTLABS_CALLBACK,
            Self::Linkvertise => ROUTE_LINKVERTISE_CALLBACK,
        }
    }

    /// Return URL on `frontend_base_url` carrying the verification token and user id.
    pub fn return_url(
        self,
        frontend_base_url: &str,
        token: &str,
        user_id: &str,
    ) -> Result<Url, GatewayError> {
        let mut url = parse_url(&format!(
            "{}{}",
            frontend_base_url.trim_end_matches('/'),
            self.callback_path()
        ))?;
        {
            let mut pairs = url.query_pairs_mut();
            match self {
                Self::LootLabs => {
                    pairs.append_pair("token", token);
                    pairs.append_pair("discord_id", user_id);
                }
                Self::Linkvertise => {
                    pairs.append_pair("discord_id", user_id);
                    pairs.append_pair("token", token);
                }
            }
        }
        Ok(url)
    }
}

impl fmt::Display for AdGatewayProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdGatewayProvider {
    type Err = GatewayError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lootlabs" => Ok(Self::LootLabs),
            "linkvertise" => Ok(Self::Linkvertise),
            other => Err(GatewayError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub lootlabs_base_url: String,
    pub lootlabs_link_id: String,
    pub linkvertise_base_url: String,
    pub linkvertise_user_id: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            lootlabs_base_url: DEFAULT_LOOTLABS_BASE_URL.to_string(),
            lootlabs_link_id: DEFAULT_LOOTLABS_LINK_ID.to_string(),
            linkvertise_base_url: DEFAULT_LINKVERTISE_BASE_URL.to_string(),
            linkvertise_user_id: DEFAULT_LINKVERTISE_USER_ID.to_string(),
        }
    }
}

/// Everything a gateway needs to build its outbound link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLink {
    pub return_url: Url,
    pub encrypted_link: String,
}

pub trait AdGateway: Send + Sync {
    fn provider(&self) -> AdGatewayProvider;

    fn outbound_url(&self, link: &ProviderLink) -> Result<Url, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct LootLabsGateway {
    base_url: String,
    link_id: String,
}

#[derive(Debug, Clone)]
pub struct LinkvertiseGateway {
    base_url: String,
    user_id: String,
}

impl LootLabsGateway {
    pub fn new(base_url: impl Into<String>, link_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            link_id: link_id.into(),
        }
    }
}

impl LinkvertiseGateway {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_id: user_id.into(),
        }
    }
}

impl AdGateway for LootLabsGateway {
    fn provider(&self) -> AdGatewayProvider {
        AdGatewayProvider::LootLabs
    }

    fn outbound_url(&self, link: &ProviderLink) -> Result<Url, GatewayError> {
        let payload = link.encrypted_link.trim();
        if payload.is_empty() {
            return Err(GatewayError::MissingPayload);
        }

        let mut url = parse_url(&format!("{}/s", self.base_url.trim_end_matches('/')))?;
        let data = byte_serialize(payload.as_bytes()).collect::<String>();
        url.set_query(Some(&format!("{}&data={data}", self.link_id.trim())));
        Ok(url)
    }
}

impl AdGateway for LinkvertiseGateway {
    fn provider(&self) -> AdGatewayProvider {
        AdGatewayProvider::Linkvertise
    }

    fn outbound_url(&self, link: &ProviderLink) -> Result<Url, GatewayError> {
        let nonce = rand::random::<f64>() * LINKVERTISE_NONCE_RANGE;
        let mut url = parse_url(&format!(
            "{}/{}/{nonce}/dynamic",
            self.base_url.trim_end_matches('/'),
            self.user_id.trim()
        ))?;
        let encoded = STANDARD.encode(link.return_url.as_str());
        url.query_pairs_mut().append_pair("r", &encoded);
        Ok(url)
    }
}

pub fn gateway_for(provider: AdGatewayProvider, settings: &GatewaySettings) -> Box<dyn AdGateway> {
    match provider {
        AdGatewayProvider::LootLabs => Box::new(LootLabsGateway::new(
            settings.lootlabs_base_url.clone(),
            settings.lootlabs_link_id.clone(),
        )),
        AdGatewayProvider::Linkvertise => Box::new(LinkvertiseGateway::new(
            settings.linkvertise_base_url.clone(),
            settings.linkvertise_user_id.clone(),
        )),
    }
}

fn parse_url(raw: &str) -> Result<Url, GatewayError> {
    Url::parse(raw).map_err(|error| GatewayError::InvalidUrl {
        message: format!("{raw}: {error}"),
    })
}
