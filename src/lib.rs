//! OpenID Connect 1.0 Provider core.
//!
//! This crate implements the protocol engine of an OpenID Connect Provider:
//! authentication request parsing and validation, authorization responses
//! across the response-type matrix, the token endpoint grants
//! (`authorization_code`, `refresh_token`), signed ID Tokens with
//! `c_hash`/`at_hash` binding, and UserInfo claim projection.
//!
//! HTTP framing, TLS, login UI and persistence are out of scope: the
//! [`Provider`] is a plain value whose handlers take url-encoded bodies plus
//! header maps and return typed responses and errors. Storage, the client
//! registry and the user claim source are supplied through the traits in
//! [`store`]; in-memory implementations suitable for tests and small
//! deployments ship in [`store::memory`].

pub mod config;
pub mod dto;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::ProviderConfiguration;
pub use services::provider::{ExtraClaims, IdTokenClaimsProvider, Provider};
pub use utils::jwt::SigningKey;
