//! UserInfo response schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// UserInfo endpoint response: the subject identifier plus the released
/// claims, flattened into one JSON object.
///
/// `sub` always equals the subject identifier issued in the corresponding
/// ID Token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}
