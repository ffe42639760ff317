//! The `claims` request parameter and the standard scope→claims mapping,
//! per "OpenID Connect Core 1.0" §5.4 and §5.5.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requested claims for one delivery target: claim name → `null` or a
/// requirement object.
pub type ClaimRequests = BTreeMap<String, Option<ClaimRequirement>>;

/// Per-claim request metadata (`{"essential": true}`, `{"value": ...}`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

/// The parsed `claims` authentication request parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<ClaimRequests>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo: Option<ClaimRequests>,
}

impl ClaimsParameter {
    /// The specific `sub` value requested for the ID Token, if any.
    pub fn id_token_sub(&self) -> Option<&Value> {
        requested_sub(self.id_token.as_ref())
    }

    /// The specific `sub` value requested for UserInfo, if any.
    pub fn userinfo_sub(&self) -> Option<&Value> {
        requested_sub(self.userinfo.as_ref())
    }
}

fn requested_sub(requests: Option<&ClaimRequests>) -> Option<&Value> {
    requests?.get("sub")?.as_ref()?.value.as_ref()
}

/// Claim names delivered for a scope value, per "OpenID Connect Core 1.0"
/// §5.4.
fn claims_for_scope(scope: &str) -> Option<&'static [&'static str]> {
    match scope {
        "openid" => Some(&["sub"]),
        "profile" => Some(&[
            "name",
            "family_name",
            "given_name",
            "middle_name",
            "nickname",
            "preferred_username",
            "profile",
            "picture",
            "website",
            "gender",
            "birthdate",
            "zoneinfo",
            "locale",
            "updated_at",
        ]),
        "email" => Some(&["email", "email_verified"]),
        "address" => Some(&["address"]),
        "phone" => Some(&["phone_number", "phone_number_verified"]),
        _ => None,
    }
}

/// Expand scope values into the claim names they stand for. Scopes without
/// a claims mapping (including `offline_access` and any custom scopes)
/// contribute nothing.
pub fn scope_to_claims(scopes: &[String]) -> ClaimRequests {
    let mut requested = ClaimRequests::new();
    for scope in scopes {
        if let Some(names) = claims_for_scope(scope) {
            for name in names {
                requested.entry((*name).to_owned()).or_insert(None);
            }
        }
    }
    requested
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_to_claims_profile() {
        let requested = scope_to_claims(&["openid".to_owned(), "profile".to_owned()]);
        assert!(requested.contains_key("sub"));
        assert!(requested.contains_key("name"));
        assert!(requested.contains_key("given_name"));
        assert!(requested.contains_key("family_name"));
        assert!(!requested.contains_key("email"));
    }

    #[test]
    fn test_scope_to_claims_ignores_unknown_scopes() {
        let requested = scope_to_claims(&["openid".to_owned(), "orders".to_owned()]);
        assert_eq!(requested.len(), 1);
    }

    #[test]
    fn test_claims_parameter_parsing() {
        let parameter: ClaimsParameter = serde_json::from_str(
            r#"{
                "id_token": {"sub": {"value": "X"}, "auth_time": {"essential": true}},
                "userinfo": {"email": null}
            }"#,
        )
        .unwrap();

        assert_eq!(parameter.id_token_sub().unwrap(), "X");
        assert!(parameter.userinfo_sub().is_none());
        let userinfo = parameter.userinfo.as_ref().unwrap();
        assert!(userinfo.get("email").unwrap().is_none());
        let id_token = parameter.id_token.as_ref().unwrap();
        assert_eq!(
            id_token["auth_time"].as_ref().unwrap().essential,
            Some(true)
        );
    }

    #[test]
    fn test_claims_parameter_round_trip() {
        let parameter: ClaimsParameter =
            serde_json::from_str(r#"{"userinfo": {"nickname": null}}"#).unwrap();
        let serialized = serde_json::to_string(&parameter).unwrap();
        let reparsed: ClaimsParameter = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parameter, reparsed);
    }
}
