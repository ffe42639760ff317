//! Error taxonomy of the provider endpoints.
//!
//! The crate has no HTTP layer, so each endpoint-facing error exposes a
//! status code as a plain `u16` plus a serializable body where one applies;
//! the embedding web layer turns those into actual responses.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dto::authorization::RawAuthenticationRequest;
use crate::dto::token::ErrorResponse;
use crate::store::StoreError;

/// OAuth 2.0 error codes used by this provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorCode {
    InvalidRequest,
    UnauthorizedClient,
    AccessDenied,
    InvalidClient,
    InvalidGrant,
    UnsupportedGrantType,
    InvalidScope,
    ServerError,
}

impl OAuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthErrorCode::InvalidRequest => "invalid_request",
            OAuthErrorCode::UnauthorizedClient => "unauthorized_client",
            OAuthErrorCode::AccessDenied => "access_denied",
            OAuthErrorCode::InvalidClient => "invalid_client",
            OAuthErrorCode::InvalidGrant => "invalid_grant",
            OAuthErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            OAuthErrorCode::InvalidScope => "invalid_scope",
            OAuthErrorCode::ServerError => "server_error",
        }
    }
}

impl fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authentication request that is malformed or violates the client's
/// registration.
///
/// Carries the request as parsed so the caller can decide whether an error
/// redirect may be built; `Provider::error_redirect_url` does that check.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InvalidAuthenticationRequest {
    pub message: String,
    pub request: RawAuthenticationRequest,
    pub oauth_error: Option<OAuthErrorCode>,
}

/// The request was valid but authorization cannot be granted.
#[derive(Debug, Error)]
pub enum AuthorizationError {
    /// A `sub` requested through the `claims` parameter does not match the
    /// subject identifier derived for this client and user.
    #[error("{0}")]
    SubjectMismatch(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A malformed or unprocessable token request (HTTP 400).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InvalidTokenRequest {
    pub message: String,
    pub oauth_error: OAuthErrorCode,
}

impl InvalidTokenRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            oauth_error: OAuthErrorCode::InvalidRequest,
        }
    }

    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            oauth_error: OAuthErrorCode::InvalidGrant,
        }
    }

    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            oauth_error: OAuthErrorCode::InvalidScope,
        }
    }

    pub fn unsupported_grant_type(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            oauth_error: OAuthErrorCode::UnsupportedGrantType,
        }
    }
}

/// Client authentication failure on the token endpoint (HTTP 401).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ClientAuthenticationError(pub String);

/// A userinfo request with a valid bearer framing but an unusable token.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidUserinfoRequest(pub String);

/// No bearer token, more than one bearer token, or malformed bearer framing.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BearerTokenError(pub String);

/// Everything `handle_token_request` can fail with.
#[derive(Debug, Error)]
pub enum TokenRequestError {
    #[error(transparent)]
    Unauthorized(#[from] ClientAuthenticationError),

    #[error(transparent)]
    Invalid(#[from] InvalidTokenRequest),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TokenRequestError {
    pub fn status(&self) -> u16 {
        match self {
            TokenRequestError::Unauthorized(_) => 401,
            TokenRequestError::Invalid(_) => 400,
            TokenRequestError::Internal(_) => 500,
        }
    }

    /// JSON body for the error response.
    pub fn body(&self) -> ErrorResponse {
        match self {
            TokenRequestError::Unauthorized(error) => ErrorResponse::new(
                OAuthErrorCode::InvalidClient.as_str(),
                Some(&error.to_string()),
            ),
            TokenRequestError::Invalid(error) => {
                ErrorResponse::new(error.oauth_error.as_str(), Some(&error.message))
            }
            TokenRequestError::Internal(_) => {
                ErrorResponse::new(OAuthErrorCode::ServerError.as_str(), None)
            }
        }
    }
}

impl From<StoreError> for TokenRequestError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Internal(inner) => TokenRequestError::Internal(inner),
            StoreError::UnknownSubject | StoreError::UnknownUser => {
                TokenRequestError::Internal(anyhow::Error::new(error))
            }
            StoreError::ScopeExceeded(_) => {
                TokenRequestError::Invalid(InvalidTokenRequest::invalid_scope(error.to_string()))
            }
            other => {
                TokenRequestError::Invalid(InvalidTokenRequest::invalid_grant(other.to_string()))
            }
        }
    }
}

/// Everything `handle_userinfo_request` can fail with.
#[derive(Debug, Error)]
pub enum UserInfoRequestError {
    #[error(transparent)]
    Bearer(#[from] BearerTokenError),

    #[error(transparent)]
    Invalid(#[from] InvalidUserinfoRequest),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl UserInfoRequestError {
    pub fn status(&self) -> u16 {
        match self {
            UserInfoRequestError::Internal(_) => 500,
            _ => 401,
        }
    }

    /// Value for the `WWW-Authenticate` response header.
    pub fn www_authenticate(&self) -> &'static str {
        r#"Bearer error="invalid_token""#
    }
}

impl From<StoreError> for UserInfoRequestError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Internal(inner) => UserInfoRequestError::Internal(inner),
            other => UserInfoRequestError::Invalid(InvalidUserinfoRequest(other.to_string())),
        }
    }
}
