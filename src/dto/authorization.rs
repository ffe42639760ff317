//! Authentication request/response wire schemas.
//!
//! Requests arrive form-urlencoded per "OpenID Connect Core 1.0" §3.1.2.1.
//! Responses are delivered as a redirect back to the client: query-encoded
//! for the plain `code` response type, fragment-encoded for everything else.

use serde::{Deserialize, Serialize};

use crate::models::claims::ClaimsParameter;
use crate::models::client::ResponseType;
use crate::utils::form::{append_params, parse_form_urlencoded};

/// An authentication request as decoded from the query string, before any
/// validation. Everything is optional at this stage; schema validation
/// produces [`AuthenticationRequest`] from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAuthenticationRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    /// The `claims` parameter, still JSON-encoded.
    pub claims: Option<String>,
}

impl RawAuthenticationRequest {
    /// Decode a form-urlencoded query string or request body.
    pub fn from_query(query: &str) -> Self {
        let mut params = parse_form_urlencoded(query);
        Self {
            response_type: params.remove("response_type"),
            client_id: params.remove("client_id"),
            redirect_uri: params.remove("redirect_uri"),
            scope: params.remove("scope"),
            state: params.remove("state"),
            nonce: params.remove("nonce"),
            claims: params.remove("claims"),
        }
    }

    /// Encoding rule for anything redirected back under this request:
    /// query for exactly `code`, fragment otherwise. An absent or
    /// unparseable `response_type` falls back to fragment encoding.
    pub fn uses_fragment_encoding(&self) -> bool {
        self.response_type
            .as_deref()
            .and_then(|value| value.parse::<ResponseType>().ok())
            .map(|response_type| response_type.uses_fragment_encoding())
            .unwrap_or(true)
    }
}

/// A validated authentication request.
///
/// Constructed by the validator pipeline, immutable afterwards; the
/// authorization state stores it verbatim so the token endpoint can
/// reconstruct the grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: ResponseType,
    /// Requested scope values; always contains `openid`.
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<ClaimsParameter>,
}

/// A successful authorization response, before redirect encoding.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthenticationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthenticationResponse {
    /// Encode the response as a redirect URL, fragment- or query-encoded.
    pub fn redirect_url(&self, redirect_uri: &str, fragment: bool) -> String {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(code) = &self.code {
            params.push(("code", code.clone()));
        }
        if let Some(access_token) = &self.access_token {
            params.push(("access_token", access_token.clone()));
        }
        if let Some(token_type) = &self.token_type {
            params.push(("token_type", token_type.clone()));
        }
        if let Some(expires_in) = self.expires_in {
            params.push(("expires_in", expires_in.to_string()));
        }
        if let Some(id_token) = &self.id_token {
            params.push(("id_token", id_token.clone()));
        }
        if let Some(state) = &self.state {
            params.push(("state", state.clone()));
        }
        append_params(redirect_uri, &params, fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_request_from_query() {
        let raw = RawAuthenticationRequest::from_query(
            "response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Frp%2Fcb&scope=openid&state=xyz",
        );
        assert_eq!(raw.response_type.as_deref(), Some("code"));
        assert_eq!(raw.client_id.as_deref(), Some("c1"));
        assert_eq!(raw.redirect_uri.as_deref(), Some("https://rp/cb"));
        assert_eq!(raw.scope.as_deref(), Some("openid"));
        assert_eq!(raw.state.as_deref(), Some("xyz"));
        assert!(raw.nonce.is_none());
    }

    #[test]
    fn test_fragment_rule_on_raw_requests() {
        let mut raw = RawAuthenticationRequest {
            response_type: Some("code".to_owned()),
            ..Default::default()
        };
        assert!(!raw.uses_fragment_encoding());

        raw.response_type = Some("code id_token".to_owned());
        assert!(raw.uses_fragment_encoding());

        raw.response_type = None;
        assert!(raw.uses_fragment_encoding());

        raw.response_type = Some("garbage".to_owned());
        assert!(raw.uses_fragment_encoding());
    }

    #[test]
    fn test_response_query_encoding() {
        let response = AuthenticationResponse {
            code: Some("abc".to_owned()),
            state: Some("xyz".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            response.redirect_url("https://rp/cb", false),
            "https://rp/cb?code=abc&state=xyz"
        );
    }

    #[test]
    fn test_response_fragment_encoding() {
        let response = AuthenticationResponse {
            access_token: Some("tok".to_owned()),
            token_type: Some("Bearer".to_owned()),
            expires_in: Some(3600),
            id_token: Some("a.b.c".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            response.redirect_url("https://rp/cb", true),
            "https://rp/cb#access_token=tok&token_type=Bearer&expires_in=3600&id_token=a.b.c"
        );
    }

    #[test]
    fn test_request_serde_round_trip() {
        let request = AuthenticationRequest {
            client_id: "c1".to_owned(),
            redirect_uri: "https://rp/cb".to_owned(),
            response_type: "code id_token".parse().unwrap(),
            scope: vec!["openid".to_owned(), "profile".to_owned()],
            state: Some("xyz".to_owned()),
            nonce: Some("n-0S6_WzA2Mj".to_owned()),
            claims: None,
        };
        let serialized = serde_json::to_string(&request).unwrap();
        let reparsed: AuthenticationRequest = serde_json::from_str(&serialized).unwrap();
        assert_eq!(request, reparsed);
    }
}
