//! Transport-free building blocks shared by the Keygate web service.
//!
//! Nothing in this crate performs I/O. The service owns the HTTP clients and
//! the request lifecycle; this crate owns the shapes exchanged with the key
//! backend, the countdown arithmetic, and the ad-gateway link formats.

pub mod auth;
pub mod gateway;
pub mod keys;

pub use auth::{ClientInputError, Session, SessionUser, normalize_base_url};
pub use gateway::{AdGateway, AdGatewayProvider, GatewayError, GatewaySettings, ProviderLink};
pub use keys::{EXPIRED_LABEL, parse_expiry, remaining_label};
