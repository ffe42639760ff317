//! Authentication request validation.
//!
//! A fixed, ordered pipeline applied to every parsed authentication
//! request: schema → client known → redirect URI registered → response type
//! registered → userinfo-claims compatibility → scope support. The pipeline
//! short-circuits on the first failing check.

use crate::config::ProviderConfiguration;
use crate::dto::authorization::{AuthenticationRequest, RawAuthenticationRequest};
use crate::error::{InvalidAuthenticationRequest, OAuthErrorCode};
use crate::models::claims::ClaimsParameter;
use crate::models::client::ClientMetadata;
use crate::store::ClientRegistry;

/// Outcome of a single failed check, before it is tied to the request it
/// was raised for.
struct ValidationFailure {
    message: String,
    oauth_error: Option<OAuthErrorCode>,
}

impl ValidationFailure {
    fn new(message: impl Into<String>, oauth_error: OAuthErrorCode) -> Self {
        Self {
            message: message.into(),
            oauth_error: Some(oauth_error),
        }
    }

    /// A failure that must never be redirected back to the client.
    fn without_redirect(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            oauth_error: None,
        }
    }
}

/// Run the validator pipeline. On success returns the validated request
/// together with the registered metadata of the requesting client.
pub(crate) async fn validate_authentication_request(
    configuration: &ProviderConfiguration,
    clients: &dyn ClientRegistry,
    raw: &RawAuthenticationRequest,
) -> Result<(AuthenticationRequest, ClientMetadata), InvalidAuthenticationRequest> {
    run_pipeline(configuration, clients, raw)
        .await
        .map_err(|failure| InvalidAuthenticationRequest {
            message: failure.message,
            request: raw.clone(),
            oauth_error: failure.oauth_error,
        })
}

async fn run_pipeline(
    configuration: &ProviderConfiguration,
    clients: &dyn ClientRegistry,
    raw: &RawAuthenticationRequest,
) -> Result<(AuthenticationRequest, ClientMetadata), ValidationFailure> {
    let request = verify_request_schema(raw)?;
    let client = client_id_is_known(clients, &request).await?;
    redirect_uri_is_registered(&client, &request)?;
    response_type_is_registered(&client, &request)?;
    userinfo_claims_require_access_token(&request)?;
    requested_scope_is_supported(configuration, &request)?;
    Ok((request, client))
}

/// All required parameters are present and well-formed, and `scope`
/// contains `openid`.
fn verify_request_schema(
    raw: &RawAuthenticationRequest,
) -> Result<AuthenticationRequest, ValidationFailure> {
    let response_type = required(raw.response_type.as_deref(), "response_type")?
        .parse()
        .map_err(|e| ValidationFailure::new(format!("{e}"), OAuthErrorCode::InvalidRequest))?;
    let client_id = required(raw.client_id.as_deref(), "client_id")?.to_owned();
    let redirect_uri = required(raw.redirect_uri.as_deref(), "redirect_uri")?.to_owned();
    let scope: Vec<String> = required(raw.scope.as_deref(), "scope")?
        .split_whitespace()
        .map(str::to_owned)
        .collect();
    if !scope.iter().any(|value| value == "openid") {
        return Err(ValidationFailure::new(
            "scope does not contain 'openid'",
            OAuthErrorCode::InvalidRequest,
        ));
    }
    let claims: Option<ClaimsParameter> = match raw.claims.as_deref() {
        Some(json) => Some(serde_json::from_str(json).map_err(|e| {
            ValidationFailure::new(
                format!("malformed claims parameter: {e}"),
                OAuthErrorCode::InvalidRequest,
            )
        })?),
        None => None,
    };

    Ok(AuthenticationRequest {
        client_id,
        redirect_uri,
        response_type,
        scope,
        state: raw.state.clone(),
        nonce: raw.nonce.clone(),
        claims,
    })
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, ValidationFailure> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ValidationFailure::new(
                format!("missing required parameter '{name}'"),
                OAuthErrorCode::InvalidRequest,
            )
        })
}

/// The client identifier exists in the registry.
async fn client_id_is_known(
    clients: &dyn ClientRegistry,
    request: &AuthenticationRequest,
) -> Result<ClientMetadata, ValidationFailure> {
    clients.lookup(&request.client_id).await.ok_or_else(|| {
        ValidationFailure::new(
            format!("unknown client_id '{}'", request.client_id),
            OAuthErrorCode::UnauthorizedClient,
        )
    })
}

/// The request `redirect_uri` is registered for the client, byte-exactly.
/// No OAuth error code: the provider must not redirect to an unregistered
/// URI, so the caller renders this server-side.
fn redirect_uri_is_registered(
    client: &ClientMetadata,
    request: &AuthenticationRequest,
) -> Result<(), ValidationFailure> {
    if client.has_redirect_uri(&request.redirect_uri) {
        Ok(())
    } else {
        Err(ValidationFailure::without_redirect(format!(
            "redirect_uri '{}' is not registered",
            request.redirect_uri
        )))
    }
}

/// The request's response-type set equals one of the registered sets.
fn response_type_is_registered(
    client: &ClientMetadata,
    request: &AuthenticationRequest,
) -> Result<(), ValidationFailure> {
    if client.allows_response_type(&request.response_type) {
        Ok(())
    } else {
        Err(ValidationFailure::new(
            format!(
                "response_type '{}' is not registered",
                request.response_type
            ),
            OAuthErrorCode::InvalidRequest,
        ))
    }
}

/// Per "OpenID Connect Core 1.0" §5.5: userinfo claims may only be
/// requested when the flow issues an access token usable at the UserInfo
/// endpoint.
fn userinfo_claims_require_access_token(
    request: &AuthenticationRequest,
) -> Result<(), ValidationFailure> {
    let requests_userinfo_claims = request
        .claims
        .as_ref()
        .is_some_and(|claims| claims.userinfo.is_some());
    if requests_userinfo_claims && request.response_type.is_id_token_only() {
        return Err(ValidationFailure::new(
            "userinfo claims cannot be requested when response_type is 'id_token'",
            OAuthErrorCode::InvalidRequest,
        ));
    }
    Ok(())
}

/// Every requested scope value appears in `scopes_supported`.
fn requested_scope_is_supported(
    configuration: &ProviderConfiguration,
    request: &AuthenticationRequest,
) -> Result<(), ValidationFailure> {
    let unsupported: Vec<&str> = request
        .scope
        .iter()
        .filter(|value| !configuration.scopes_supported.contains(*value))
        .map(String::as_str)
        .collect();
    if unsupported.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure::new(
            format!(
                "request contains unsupported/unknown scopes: {}",
                unsupported.join(", ")
            ),
            OAuthErrorCode::InvalidScope,
        ))
    }
}
