//! Collaborator interfaces of the provider.
//!
//! The protocol engine is deliberately storage-agnostic: authorization
//! state, the client registry and the user claim source sit behind these
//! traits and are shared read-only for the lifetime of the provider.
//! [`memory`] has implementations backed by process memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::dto::authorization::AuthenticationRequest;
use crate::models::claims::ClaimRequests;
use crate::models::client::{ClientMetadata, SubjectType};

pub mod memory;

/// Failures surfaced by the collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown or expired authorization code")]
    UnknownCode,

    #[error("authorization code has already been exchanged")]
    CodeConsumed,

    #[error("unknown or expired access token")]
    UnknownAccessToken,

    #[error("unknown or revoked refresh token")]
    UnknownRefreshToken,

    #[error("requested scope exceeds the granted scope: {0}")]
    ScopeExceeded(String),

    #[error("unknown subject identifier")]
    UnknownSubject,

    #[error("unknown user identifier")]
    UnknownUser,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// An issued access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Opaque token value
    pub value: String,
    /// Token type, `Bearer`
    pub token_type: String,
    /// Remaining lifetime in seconds
    pub expires_in: i64,
    /// Granted scope values
    pub scope: Vec<String>,
}

/// Introspection result for an access token, RFC 7662 shaped: only `active`
/// is meaningful when the token is unknown or expired.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Issues and resolves authorization codes, access tokens, refresh tokens
/// and subject identifiers, and links them back to the originating
/// authentication request.
///
/// Implementations must make `exchange_code_for_token` and
/// `use_refresh_token` atomic and single-shot: of two concurrent calls with
/// the same value exactly one succeeds.
#[async_trait]
pub trait AuthorizationState: Send + Sync {
    /// Issue a single-use authorization code bound to the request and
    /// subject identifier.
    async fn create_authorization_code(
        &self,
        request: &AuthenticationRequest,
        sub: &str,
    ) -> Result<String, StoreError>;

    /// Issue an access token bound to the request and subject identifier.
    async fn create_access_token(
        &self,
        request: &AuthenticationRequest,
        sub: &str,
    ) -> Result<AccessToken, StoreError>;

    /// Issue a refresh token bound to an existing access token's grant.
    async fn create_refresh_token(&self, access_token_value: &str) -> Result<String, StoreError>;

    /// Consume an authorization code, yielding a fresh access token.
    async fn exchange_code_for_token(&self, code: &str) -> Result<AccessToken, StoreError>;

    /// Consume a refresh token, yielding a fresh access token and, when the
    /// implementation rotates, a replacement refresh token. `scope` narrows
    /// the grant and must be a subset of the original scope.
    async fn use_refresh_token(
        &self,
        refresh_token: &str,
        scope: Option<&[String]>,
    ) -> Result<(AccessToken, Option<String>), StoreError>;

    async fn get_authorization_request_for_code(
        &self,
        code: &str,
    ) -> Result<AuthenticationRequest, StoreError>;

    async fn get_subject_identifier_for_code(&self, code: &str) -> Result<String, StoreError>;

    async fn get_user_id_for_subject_identifier(&self, sub: &str) -> Result<String, StoreError>;

    async fn get_authorization_request_for_access_token(
        &self,
        access_token_value: &str,
    ) -> Result<AuthenticationRequest, StoreError>;

    async fn introspect_access_token(
        &self,
        access_token_value: &str,
    ) -> Result<Introspection, StoreError>;

    /// Derive the subject identifier for a user towards a sector. Stable per
    /// `(subject_type, user_id, sector_identifier)`.
    async fn get_subject_identifier(
        &self,
        subject_type: SubjectType,
        user_id: &str,
        sector_identifier: &str,
    ) -> Result<String, StoreError>;
}

/// Read-only mapping from `client_id` to registered client metadata.
/// Updates happen out-of-band from the provider's perspective.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn lookup(&self, client_id: &str) -> Option<ClientMetadata>;
}

/// Source of user claims.
#[async_trait]
pub trait UserInfoSource: Send + Sync {
    /// Resolve the requested claims for a local user id. Implementations
    /// return the claims they have values for and omit the rest.
    async fn claims_for(
        &self,
        user_id: &str,
        requested: &ClaimRequests,
    ) -> Result<Map<String, Value>, StoreError>;
}
