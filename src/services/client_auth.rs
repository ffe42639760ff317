//! Token endpoint client authentication.
//!
//! Verifies exactly one credential form was supplied and that it matches
//! the method registered for the client: `client_secret_basic`,
//! `client_secret_post` or `none`.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::ClientAuthenticationError;
use crate::models::client::TokenEndpointAuthMethod;
use crate::store::ClientRegistry;
use crate::utils::secret::secrets_match;

/// Verify the client authentication of a token request.
///
/// `params` is the decoded form body; `authorization_header` the raw value
/// of the `Authorization` header if one was sent. Returns the authenticated
/// `client_id`.
pub(crate) async fn verify_client_authentication(
    clients: &dyn ClientRegistry,
    params: &HashMap<String, String>,
    authorization_header: Option<&str>,
) -> Result<String, ClientAuthenticationError> {
    let basic = match authorization_header {
        Some(header) => Some(parse_basic_credentials(header)?),
        None => None,
    };
    let post_secret = params.get("client_secret");

    if basic.is_some() && post_secret.is_some() {
        return Err(ClientAuthenticationError(
            "more than one client authentication method used".to_owned(),
        ));
    }

    let body_client_id = params.get("client_id");
    if let (Some((basic_id, _)), Some(body_id)) = (&basic, body_client_id) {
        if basic_id != body_id {
            return Err(ClientAuthenticationError(
                "client_id in request body does not match Authorization header".to_owned(),
            ));
        }
    }

    let client_id = basic
        .as_ref()
        .map(|(client_id, _)| client_id.clone())
        .or_else(|| body_client_id.cloned())
        .ok_or_else(|| ClientAuthenticationError("no client_id supplied".to_owned()))?;

    let client = clients
        .lookup(&client_id)
        .await
        .ok_or_else(|| ClientAuthenticationError(format!("unknown client_id '{client_id}'")))?;

    match client.token_endpoint_auth_method {
        TokenEndpointAuthMethod::ClientSecretBasic => {
            let (_, supplied) = basic.ok_or_else(|| {
                ClientAuthenticationError(
                    "client is registered for HTTP Basic authentication".to_owned(),
                )
            })?;
            verify_secret(&client_id, client.client_secret.as_deref(), &supplied)?;
        }
        TokenEndpointAuthMethod::ClientSecretPost => {
            let supplied = post_secret.ok_or_else(|| {
                ClientAuthenticationError(
                    "client is registered for client_secret_post authentication".to_owned(),
                )
            })?;
            verify_secret(&client_id, client.client_secret.as_deref(), supplied)?;
        }
        TokenEndpointAuthMethod::None => {
            if basic.is_some() || post_secret.is_some() {
                return Err(ClientAuthenticationError(
                    "public client must not send credentials".to_owned(),
                ));
            }
        }
    }

    Ok(client_id)
}

fn verify_secret(
    client_id: &str,
    registered: Option<&str>,
    supplied: &str,
) -> Result<(), ClientAuthenticationError> {
    let registered = registered.ok_or_else(|| {
        ClientAuthenticationError(format!("no client_secret registered for '{client_id}'"))
    })?;
    if secrets_match(supplied, registered) {
        Ok(())
    } else {
        Err(ClientAuthenticationError("invalid client_secret".to_owned()))
    }
}

/// Decode `Authorization: Basic base64(client_id:client_secret)`.
fn parse_basic_credentials(
    header: &str,
) -> Result<(String, String), ClientAuthenticationError> {
    let encoded = header.strip_prefix("Basic ").ok_or_else(|| {
        ClientAuthenticationError("unsupported Authorization scheme".to_owned())
    })?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ClientAuthenticationError("malformed Basic credentials".to_owned()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ClientAuthenticationError("malformed Basic credentials".to_owned()))?;
    let (client_id, client_secret) = decoded.split_once(':').ok_or_else(|| {
        ClientAuthenticationError("malformed Basic credentials".to_owned())
    })?;
    Ok((client_id.to_owned(), client_secret.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::client::ClientMetadata;
    use crate::store::memory::InMemoryClientRegistry;

    fn registry() -> InMemoryClientRegistry {
        let mut registry = InMemoryClientRegistry::new();

        let mut basic = ClientMetadata::new(
            vec!["https://rp.example.com/cb".to_owned()],
            vec!["code".parse().unwrap()],
        );
        basic.client_secret = Some("basic-secret".to_owned());
        registry.register("basic-client", basic).unwrap();

        let mut post = ClientMetadata::new(
            vec!["https://rp.example.com/cb".to_owned()],
            vec!["code".parse().unwrap()],
        );
        post.token_endpoint_auth_method = TokenEndpointAuthMethod::ClientSecretPost;
        post.client_secret = Some("post-secret".to_owned());
        registry.register("post-client", post).unwrap();

        let mut public = ClientMetadata::new(
            vec!["https://rp.example.com/cb".to_owned()],
            vec!["code".parse().unwrap()],
        );
        public.token_endpoint_auth_method = TokenEndpointAuthMethod::None;
        registry.register("public-client", public).unwrap();

        registry
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    fn basic_header(client_id: &str, client_secret: &str) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{client_id}:{client_secret}"))
        )
    }

    #[tokio::test]
    async fn test_basic_authentication() {
        let registry = registry();
        let header = basic_header("basic-client", "basic-secret");
        let client_id =
            verify_client_authentication(&registry, &params(&[]), Some(&header))
                .await
                .unwrap();
        assert_eq!(client_id, "basic-client");

        let bad_header = basic_header("basic-client", "wrong");
        assert!(
            verify_client_authentication(&registry, &params(&[]), Some(&bad_header))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_post_authentication() {
        let registry = registry();
        let client_id = verify_client_authentication(
            &registry,
            &params(&[("client_id", "post-client"), ("client_secret", "post-secret")]),
            None,
        )
        .await
        .unwrap();
        assert_eq!(client_id, "post-client");

        assert!(verify_client_authentication(
            &registry,
            &params(&[("client_id", "post-client"), ("client_secret", "wrong")]),
            None,
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_public_client() {
        let registry = registry();
        let client_id = verify_client_authentication(
            &registry,
            &params(&[("client_id", "public-client")]),
            None,
        )
        .await
        .unwrap();
        assert_eq!(client_id, "public-client");

        // Credentials from a public client are rejected outright.
        assert!(verify_client_authentication(
            &registry,
            &params(&[("client_id", "public-client"), ("client_secret", "x")]),
            None,
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_mixed_methods_rejected() {
        let registry = registry();
        let header = basic_header("basic-client", "basic-secret");
        let error = verify_client_authentication(
            &registry,
            &params(&[("client_id", "basic-client"), ("client_secret", "basic-secret")]),
            Some(&header),
        )
        .await
        .unwrap_err();
        assert!(error.0.contains("more than one"));
    }

    #[tokio::test]
    async fn test_method_mismatch_rejected() {
        let registry = registry();
        // Registered for basic, authenticating via post.
        assert!(verify_client_authentication(
            &registry,
            &params(&[("client_id", "basic-client"), ("client_secret", "basic-secret")]),
            None,
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_basic_and_body_client_id_must_match() {
        let registry = registry();
        let header = basic_header("basic-client", "basic-secret");
        assert!(verify_client_authentication(
            &registry,
            &params(&[("client_id", "post-client")]),
            Some(&header),
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_unknown_client_rejected() {
        let registry = registry();
        assert!(
            verify_client_authentication(&registry, &params(&[("client_id", "ghost")]), None)
                .await
                .is_err()
        );
    }

    #[test]
    fn test_parse_basic_credentials() {
        let (client_id, client_secret) =
            parse_basic_credentials(&basic_header("c1", "s:with:colons")).unwrap();
        assert_eq!(client_id, "c1");
        assert_eq!(client_secret, "s:with:colons");

        assert!(parse_basic_credentials("Bearer abc").is_err());
        assert!(parse_basic_credentials("Basic !!!").is_err());
    }
}
