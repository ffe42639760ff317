use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::client::SubjectType;

/// Provider configuration, per "OpenID Connect Discovery 1.0" §3.
///
/// The typed fields are the ones the protocol engine interprets; everything
/// else a discovery document may carry goes through `extra` untouched.
/// Immutable once handed to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfiguration {
    pub issuer: String,
    #[serde(default = "default_scopes_supported")]
    pub scopes_supported: Vec<String>,
    #[serde(default = "default_subject_types_supported")]
    pub subject_types_supported: Vec<SubjectType>,
    #[serde(default = "default_id_token_signing_algs")]
    pub id_token_signing_alg_values_supported: Vec<String>,
    /// Discovery fields the provider does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_scopes_supported() -> Vec<String> {
    vec!["openid".to_owned()]
}

fn default_subject_types_supported() -> Vec<SubjectType> {
    vec![SubjectType::Pairwise]
}

fn default_id_token_signing_algs() -> Vec<String> {
    vec!["RS256".to_owned()]
}

impl ProviderConfiguration {
    /// Configuration for the given issuer with defaulted capability lists.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            scopes_supported: default_scopes_supported(),
            subject_types_supported: default_subject_types_supported(),
            id_token_signing_alg_values_supported: default_id_token_signing_algs(),
            extra: Map::new(),
        }
    }

    pub fn with_scopes_supported<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes_supported = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subject_types_supported(mut self, subject_types: Vec<SubjectType>) -> Self {
        self.subject_types_supported = subject_types;
        self
    }

    pub fn with_id_token_signing_algs<I, S>(mut self, algs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_token_signing_alg_values_supported = algs.into_iter().map(Into::into).collect();
        self
    }

    /// Replace empty capability lists with their defaults. A deserialized
    /// configuration may carry explicit empty arrays; the provider never
    /// operates with empty capabilities.
    pub fn with_defaults(mut self) -> Self {
        if self.scopes_supported.is_empty() {
            self.scopes_supported = default_scopes_supported();
        }
        if self.subject_types_supported.is_empty() {
            self.subject_types_supported = default_subject_types_supported();
        }
        if self.id_token_signing_alg_values_supported.is_empty() {
            self.id_token_signing_alg_values_supported = default_id_token_signing_algs();
        }
        self
    }

    /// The configuration as a discovery-document map. The typed fields win
    /// over same-named entries in `extra`.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        map.insert("issuer".to_owned(), Value::String(self.issuer.clone()));
        map.insert("scopes_supported".to_owned(), json!(self.scopes_supported));
        map.insert(
            "subject_types_supported".to_owned(),
            json!(self.subject_types_supported),
        );
        map.insert(
            "id_token_signing_alg_values_supported".to_owned(),
            json!(self.id_token_signing_alg_values_supported),
        );
        map
    }
}
