//! Token endpoint wire schemas.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::InvalidTokenRequest;

/// Parameters of an `authorization_code` grant.
#[derive(Debug, Clone)]
pub struct CodeExchangeRequest {
    pub code: String,
    pub redirect_uri: String,
    pub client_id: String,
}

impl CodeExchangeRequest {
    /// Validate the grant-specific schema from the decoded form body.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, InvalidTokenRequest> {
        Ok(Self {
            code: require(params, "code")?,
            redirect_uri: require(params, "redirect_uri")?,
            client_id: require(params, "client_id")?,
        })
    }
}

/// Parameters of a `refresh_token` grant.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub refresh_token: String,
    /// Optional scope narrowing; must be a subset of the original grant.
    pub scope: Option<Vec<String>>,
}

impl RefreshRequest {
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, InvalidTokenRequest> {
        Ok(Self {
            refresh_token: require(params, "refresh_token")?,
            scope: params
                .get("scope")
                .map(|scope| scope.split_whitespace().map(str::to_owned).collect()),
        })
    }
}

fn require(params: &HashMap<String, String>, name: &str) -> Result<String, InvalidTokenRequest> {
    params
        .get(name)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| InvalidTokenRequest::new(format!("{name} is required")))
}

/// Token endpoint success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Space-separated granted scope, included when it may differ from the
    /// requested one (refresh narrowing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// OAuth 2.0 error response body, RFC 6749 §5.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str, description: Option<&str>) -> Self {
        Self {
            error: error.to_owned(),
            error_description: description.map(str::to_owned),
        }
    }
}
