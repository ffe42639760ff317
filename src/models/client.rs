//! Registered client metadata.
//!
//! Entries follow "OpenID Connect Dynamic Client Registration 1.0" §2: a
//! validated typed core plus a free-form extension map for fields the
//! provider does not interpret.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Subject identifier type, per "OpenID Connect Core 1.0" §8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    /// Same `sub` for a user across all clients
    Public,
    /// `sub` scoped to the client's sector
    Pairwise,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Public => "public",
            SubjectType::Pairwise => "pairwise",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client authentication method on the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// `client_id:client_secret` in an HTTP Basic Authorization header
    ClientSecretBasic,
    /// `client_id` and `client_secret` in the form body
    ClientSecretPost,
    /// Public client, `client_id` only
    None,
}

/// One token of a `response_type` value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseTypeToken {
    Code,
    Token,
    IdToken,
    None,
}

impl ResponseTypeToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseTypeToken::Code => "code",
            ResponseTypeToken::Token => "token",
            ResponseTypeToken::IdToken => "id_token",
            ResponseTypeToken::None => "none",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown response_type value '{0}'")]
pub struct ResponseTypeParseError(String);

/// A `response_type` value: an order-insensitive set of tokens.
///
/// `code id_token` and `id_token code` compare equal; equality against the
/// client's registered response types is set equality.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseType(BTreeSet<ResponseTypeToken>);

impl ResponseType {
    pub fn new<I: IntoIterator<Item = ResponseTypeToken>>(tokens: I) -> Self {
        Self(tokens.into_iter().collect())
    }

    pub fn contains(&self, token: ResponseTypeToken) -> bool {
        self.0.contains(&token)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Exactly the Authorization Code Flow value `code`.
    pub fn is_code_only(&self) -> bool {
        self.len() == 1 && self.contains(ResponseTypeToken::Code)
    }

    /// Exactly the Implicit Flow value `id_token`: the only shape that
    /// issues no access token at all.
    pub fn is_id_token_only(&self) -> bool {
        self.len() == 1 && self.contains(ResponseTypeToken::IdToken)
    }

    /// Authorization responses are fragment-encoded for every response type
    /// except plain `code`, which uses query encoding.
    pub fn uses_fragment_encoding(&self) -> bool {
        !self.is_code_only()
    }
}

impl FromStr for ResponseType {
    type Err = ResponseTypeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut tokens = BTreeSet::new();
        for part in value.split_whitespace() {
            let token = match part {
                "code" => ResponseTypeToken::Code,
                "token" => ResponseTypeToken::Token,
                "id_token" => ResponseTypeToken::IdToken,
                "none" => ResponseTypeToken::None,
                other => return Err(ResponseTypeParseError(other.to_owned())),
            };
            tokens.insert(token);
        }
        if tokens.is_empty() {
            return Err(ResponseTypeParseError(value.to_owned()));
        }
        Ok(Self(tokens))
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ResponseTypeToken::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&joined)
    }
}

impl Serialize for ResponseType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResponseType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Error)]
#[error("invalid client metadata: {0}")]
pub struct InvalidClientMetadata(pub String);

/// Metadata of a registered relying party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Registered redirect URIs; the request `redirect_uri` must match one
    /// byte-exactly.
    pub redirect_uris: Vec<String>,
    /// Registered response types; the request's set must equal one of them.
    pub response_types: Vec<ResponseType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<SubjectType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_signed_response_alg: Option<String>,
    /// Carried as registration metadata only: the provider neither resolves
    /// it nor uses it for pairwise sector derivation, which is based on the
    /// redirect URI's host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector_identifier_uri: Option<String>,
    #[serde(default = "default_token_endpoint_auth_method")]
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Registration fields the provider does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_token_endpoint_auth_method() -> TokenEndpointAuthMethod {
    TokenEndpointAuthMethod::ClientSecretBasic
}

impl ClientMetadata {
    /// Minimal metadata for a confidential client with one redirect URI.
    pub fn new(redirect_uris: Vec<String>, response_types: Vec<ResponseType>) -> Self {
        Self {
            redirect_uris,
            response_types,
            subject_type: None,
            id_token_signed_response_alg: None,
            sector_identifier_uri: None,
            token_endpoint_auth_method: default_token_endpoint_auth_method(),
            client_secret: None,
            extra: Map::new(),
        }
    }

    /// Check a redirect URI against the registered ones (exact match, no
    /// partial matching).
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    /// Check a requested response-type set against the registered ones.
    pub fn allows_response_type(&self, response_type: &ResponseType) -> bool {
        self.response_types
            .iter()
            .any(|registered| registered == response_type)
    }

    /// Validate the required fields.
    pub fn validate(&self) -> Result<(), InvalidClientMetadata> {
        if self.redirect_uris.is_empty() {
            return Err(InvalidClientMetadata("redirect_uris is empty".to_owned()));
        }
        for uri in &self.redirect_uris {
            let parsed = url::Url::parse(uri)
                .map_err(|e| InvalidClientMetadata(format!("redirect_uri '{uri}': {e}")))?;
            if parsed.host_str().is_none() {
                return Err(InvalidClientMetadata(format!(
                    "redirect_uri '{uri}' has no host"
                )));
            }
        }
        if self.response_types.is_empty() {
            return Err(InvalidClientMetadata("response_types is empty".to_owned()));
        }
        if self.client_secret.is_none()
            && !matches!(
                self.token_endpoint_auth_method,
                TokenEndpointAuthMethod::None
            )
        {
            return Err(InvalidClientMetadata(format!(
                "token_endpoint_auth_method '{:?}' requires a client_secret",
                self.token_endpoint_auth_method
            )));
        }
        Ok(())
    }
}
