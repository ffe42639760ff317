//! The OpenID Connect Provider protocol engine.
//!
//! A [`Provider`] is a passive value: each handler is a function of its
//! inputs plus the external collaborators, so handlers may run concurrently
//! from any number of tasks. The provider itself holds only immutable
//! configuration and shared references.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use serde_json::{Map, Value};
use url::Url;

use crate::config::ProviderConfiguration;
use crate::dto::authorization::{
    AuthenticationRequest, AuthenticationResponse, RawAuthenticationRequest,
};
use crate::dto::token::{CodeExchangeRequest, RefreshRequest, TokenResponse};
use crate::dto::userinfo::UserInfoResponse;
use crate::error::{
    AuthorizationError, BearerTokenError, InvalidAuthenticationRequest, InvalidTokenRequest,
    InvalidUserinfoRequest, TokenRequestError, UserInfoRequestError,
};
use crate::models::claims::{scope_to_claims, ClaimRequests};
use crate::models::client::{ClientMetadata, SubjectType};
use crate::services::{client_auth, validation};
use crate::store::{AuthorizationState, ClientRegistry, UserInfoSource};
use crate::utils::form::{append_params, parse_form_urlencoded};
use crate::utils::jwk::JsonWebKeySet;
use crate::utils::jwt::{left_hash, parse_algorithm, SigningKey};

/// Default ID Token lifetime in seconds
pub const DEFAULT_ID_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Extra claims merged into every issued ID Token: either a static map or
/// a callable invoked per issuance with the local user id and client id.
pub enum ExtraClaims {
    Static(Map<String, Value>),
    Dynamic(Box<dyn IdTokenClaimsProvider>),
}

/// Per-request extra-claims callable.
pub trait IdTokenClaimsProvider: Send + Sync {
    fn claims_for(&self, user_id: &str, client_id: &str) -> Map<String, Value>;
}

impl<F> IdTokenClaimsProvider for F
where
    F: Fn(&str, &str) -> Map<String, Value> + Send + Sync,
{
    fn claims_for(&self, user_id: &str, client_id: &str) -> Map<String, Value> {
        self(user_id, client_id)
    }
}

impl ExtraClaims {
    pub fn from_map(claims: Map<String, Value>) -> Self {
        ExtraClaims::Static(claims)
    }

    pub fn from_provider(provider: impl IdTokenClaimsProvider + 'static) -> Self {
        ExtraClaims::Dynamic(Box::new(provider))
    }

    fn resolve(&self, user_id: &str, client_id: &str) -> Map<String, Value> {
        match self {
            ExtraClaims::Static(claims) => claims.clone(),
            ExtraClaims::Dynamic(provider) => provider.claims_for(user_id, client_id),
        }
    }
}

impl std::fmt::Debug for ExtraClaims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtraClaims::Static(claims) => f.debug_tuple("Static").field(claims).finish(),
            ExtraClaims::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

fn resolve_extra_claims(
    extra: Option<&ExtraClaims>,
    user_id: &str,
    client_id: &str,
) -> Map<String, Value> {
    extra
        .map(|claims| claims.resolve(user_id, client_id))
        .unwrap_or_default()
}

/// OpenID Connect Provider.
#[derive(Clone)]
pub struct Provider {
    signing_key: SigningKey,
    configuration: ProviderConfiguration,
    authz_state: Arc<dyn AuthorizationState>,
    clients: Arc<dyn ClientRegistry>,
    userinfo: Arc<dyn UserInfoSource>,
    id_token_lifetime: i64,
}

impl Provider {
    /// Create a provider over its collaborators. Empty capability lists in
    /// the configuration are replaced with their defaults.
    pub fn new(
        signing_key: SigningKey,
        configuration: ProviderConfiguration,
        authz_state: Arc<dyn AuthorizationState>,
        clients: Arc<dyn ClientRegistry>,
        userinfo: Arc<dyn UserInfoSource>,
    ) -> Self {
        Self {
            signing_key,
            configuration: configuration.with_defaults(),
            authz_state,
            clients,
            userinfo,
            id_token_lifetime: DEFAULT_ID_TOKEN_LIFETIME_SECS,
        }
    }

    /// Override how long issued ID Tokens stay valid.
    pub fn with_id_token_lifetime(mut self, seconds: i64) -> Self {
        self.id_token_lifetime = seconds;
        self
    }

    pub fn configuration(&self) -> &ProviderConfiguration {
        &self.configuration
    }

    /// The provider configuration as a discovery-document map. A fresh deep
    /// copy on every call; the underlying configuration never changes.
    pub fn provider_configuration(&self) -> Map<String, Value> {
        self.configuration.to_map()
    }

    /// All keys published by the provider as a JSON Web Key Set.
    pub fn jwks(&self) -> JsonWebKeySet {
        JsonWebKeySet {
            keys: self.signing_key.jwk().cloned().into_iter().collect(),
        }
    }

    // ========================================================================
    // Authorization endpoint
    // ========================================================================

    /// Parse and validate an authentication request from a form-urlencoded
    /// query string or request body.
    pub async fn parse_authentication_request(
        &self,
        request_body: &str,
    ) -> Result<AuthenticationRequest, InvalidAuthenticationRequest> {
        let raw = RawAuthenticationRequest::from_query(request_body);
        let (request, _client) = validation::validate_authentication_request(
            &self.configuration,
            self.clients.as_ref(),
            &raw,
        )
        .await?;
        tracing::debug!(client_id = %request.client_id, response_type = %request.response_type,
            "parsed authentication request");
        Ok(request)
    }

    /// Build the error redirect for a rejected authentication request, when
    /// one may be built at all: the request must carry an OAuth error code
    /// and a redirect URI registered for a known client. Returns `None`
    /// otherwise, in which case the error is rendered server-side.
    pub async fn error_redirect_url(
        &self,
        error: &InvalidAuthenticationRequest,
    ) -> Option<String> {
        let oauth_error = error.oauth_error?;
        let redirect_uri = error.request.redirect_uri.as_deref()?;
        let client_id = error.request.client_id.as_deref()?;
        let client = self.clients.lookup(client_id).await?;
        if !client.has_redirect_uri(redirect_uri) {
            return None;
        }
        let params = [
            ("error", oauth_error.as_str().to_owned()),
            ("error_message", error.message.clone()),
        ];
        Some(append_params(
            redirect_uri,
            &params,
            error.request.uses_fragment_encoding(),
        ))
    }

    /// Create the authorization response for a validated authentication
    /// request and an already-authenticated local user.
    pub async fn authorize(
        &self,
        request: &AuthenticationRequest,
        user_id: &str,
        extra_id_token_claims: Option<&ExtraClaims>,
    ) -> Result<AuthenticationResponse, AuthorizationError> {
        use crate::models::client::ResponseTypeToken::{Code, IdToken, Token};

        let client = self.clients.lookup(&request.client_id).await.ok_or_else(|| {
            AuthorizationError::Internal(anyhow!(
                "client '{}' disappeared from the registry",
                request.client_id
            ))
        })?;

        let sub = self
            .create_subject_identifier(&client, user_id, &request.redirect_uri)
            .await?;
        check_subject_identifier_matches_requested(request, &sub)?;

        let mut response = AuthenticationResponse::default();

        let mut authz_code = None;
        if request.response_type.contains(Code) {
            let code = self
                .authz_state
                .create_authorization_code(request, &sub)
                .await?;
            response.code = Some(code.clone());
            authz_code = Some(code);
        }

        let mut access_token_value = None;
        if request.response_type.contains(Token) {
            let access_token = self.authz_state.create_access_token(request, &sub).await?;
            access_token_value = Some(access_token.value.clone());
            response.access_token = Some(access_token.value);
            response.token_type = Some(access_token.token_type);
            response.expires_in = Some(access_token.expires_in);
        }

        if request.response_type.contains(IdToken) {
            let extra = resolve_extra_claims(extra_id_token_claims, user_id, &request.client_id);

            let mut requested: ClaimRequests = request
                .claims
                .as_ref()
                .and_then(|claims| claims.id_token.clone())
                .unwrap_or_default();
            if request.response_type.is_id_token_only() {
                // No access token will be issued, so the UserInfo endpoint
                // is unreachable: fold the scope-derived claims into the
                // ID Token itself.
                for (name, requirement) in scope_to_claims(&request.scope) {
                    requested.entry(name).or_insert(requirement);
                }
            }

            let user_claims = self.userinfo.claims_for(user_id, &requested).await?;
            let id_token = self
                .signed_id_token(
                    &request.client_id,
                    &client,
                    &sub,
                    user_claims,
                    request.nonce.as_deref(),
                    authz_code.as_deref(),
                    access_token_value.as_deref(),
                    extra,
                )
                .map_err(AuthorizationError::Internal)?;
            response.id_token = Some(id_token);
        }

        response.state = request.state.clone();

        tracing::debug!(
            client_id = %request.client_id,
            response_type = %request.response_type,
            code_issued = response.code.is_some(),
            access_token_issued = response.access_token.is_some(),
            id_token_issued = response.id_token.is_some(),
            "authorized request"
        );
        Ok(response)
    }

    async fn create_subject_identifier(
        &self,
        client: &ClientMetadata,
        user_id: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthorizationError> {
        let subject_type = client
            .subject_type
            .or_else(|| self.configuration.subject_types_supported.first().copied())
            .unwrap_or(SubjectType::Pairwise);
        let sector_identifier = sector_identifier(redirect_uri)?;
        Ok(self
            .authz_state
            .get_subject_identifier(subject_type, user_id, &sector_identifier)
            .await?)
    }

    /// Assemble the ID Token payload and sign it, per "OpenID Connect Core
    /// 1.0" §2 and §3.3.2.11: `c_hash`/`at_hash` bind the token to whatever
    /// was issued alongside it, and the protocol claims always win over
    /// user-sourced ones.
    #[allow(clippy::too_many_arguments)]
    fn signed_id_token(
        &self,
        client_id: &str,
        client: &ClientMetadata,
        sub: &str,
        user_claims: Map<String, Value>,
        nonce: Option<&str>,
        authorization_code: Option<&str>,
        access_token_value: Option<&str>,
        extra_claims: Map<String, Value>,
    ) -> anyhow::Result<String> {
        let alg_name = client
            .id_token_signed_response_alg
            .as_deref()
            .or_else(|| {
                self.configuration
                    .id_token_signing_alg_values_supported
                    .first()
                    .map(String::as_str)
            })
            .unwrap_or("RS256");
        let algorithm = parse_algorithm(alg_name)?;

        let mut claims = Map::new();
        if let Some(code) = authorization_code {
            claims.insert("c_hash".to_owned(), Value::String(left_hash(code, algorithm)?));
        }
        if let Some(token) = access_token_value {
            claims.insert("at_hash".to_owned(), Value::String(left_hash(token, algorithm)?));
        }
        for (name, value) in user_claims {
            claims.insert(name, value);
        }
        for (name, value) in extra_claims {
            claims.insert(name, value);
        }

        let now = Utc::now().timestamp();
        claims.insert("iss".to_owned(), Value::String(self.configuration.issuer.clone()));
        claims.insert("sub".to_owned(), Value::String(sub.to_owned()));
        claims.insert("aud".to_owned(), Value::String(client_id.to_owned()));
        claims.insert("iat".to_owned(), Value::from(now));
        claims.insert("exp".to_owned(), Value::from(now + self.id_token_lifetime));
        if let Some(nonce) = nonce {
            claims.insert("nonce".to_owned(), Value::String(nonce.to_owned()));
        }

        self.signing_key.sign_claims(&claims, algorithm)
    }

    // ========================================================================
    // Token endpoint
    // ========================================================================

    /// Handle a token request: authenticate the client, then dispatch on
    /// `grant_type`.
    pub async fn handle_token_request(
        &self,
        request_body: &str,
        http_headers: Option<&HashMap<String, String>>,
        extra_id_token_claims: Option<&ExtraClaims>,
    ) -> Result<TokenResponse, TokenRequestError> {
        let params = parse_form_urlencoded(request_body);
        let authorization = header_value(http_headers, "authorization");
        let client_id =
            client_auth::verify_client_authentication(self.clients.as_ref(), &params, authorization)
                .await?;

        match params.get("grant_type").map(String::as_str) {
            None => Err(InvalidTokenRequest::new("grant_type missing").into()),
            Some("authorization_code") => {
                tracing::debug!(client_id = %client_id, "handling authorization_code grant");
                self.code_exchange(&params, extra_id_token_claims).await
            }
            Some("refresh_token") => {
                tracing::debug!(client_id = %client_id, "handling refresh_token grant");
                self.token_refresh(&params).await
            }
            Some(other) => Err(InvalidTokenRequest::unsupported_grant_type(format!(
                "grant_type '{other}' unknown"
            ))
            .into()),
        }
    }

    /// Exchange an authorization code for tokens and a fresh ID Token.
    async fn code_exchange(
        &self,
        params: &HashMap<String, String>,
        extra_id_token_claims: Option<&ExtraClaims>,
    ) -> Result<TokenResponse, TokenRequestError> {
        let token_request = CodeExchangeRequest::from_params(params)?;

        let authentication_request = self
            .authz_state
            .get_authorization_request_for_code(&token_request.code)
            .await?;

        if token_request.redirect_uri != authentication_request.redirect_uri {
            return Err(InvalidTokenRequest::new(format!(
                "invalid redirect_uri: {} != {}",
                token_request.redirect_uri, authentication_request.redirect_uri
            ))
            .into());
        }

        let sub = self
            .authz_state
            .get_subject_identifier_for_code(&token_request.code)
            .await?;
        let user_id = self
            .authz_state
            .get_user_id_for_subject_identifier(&sub)
            .await?;

        // The exchange consumes the code; of two concurrent exchanges of
        // the same code exactly one reaches this point successfully.
        let access_token = self
            .authz_state
            .exchange_code_for_token(&token_request.code)
            .await?;
        let refresh_token = self
            .authz_state
            .create_refresh_token(&access_token.value)
            .await?;

        let extra = resolve_extra_claims(
            extra_id_token_claims,
            &user_id,
            &authentication_request.client_id,
        );
        // Only claims requested for the ID Token: the client holds an
        // access token now and gets everything else from UserInfo.
        let requested = authentication_request
            .claims
            .as_ref()
            .and_then(|claims| claims.id_token.clone())
            .unwrap_or_default();
        let user_claims = self.userinfo.claims_for(&user_id, &requested).await?;

        let client = self
            .clients
            .lookup(&authentication_request.client_id)
            .await
            .ok_or_else(|| {
                TokenRequestError::Internal(anyhow!(
                    "client '{}' disappeared from the registry",
                    authentication_request.client_id
                ))
            })?;
        let id_token = self
            .signed_id_token(
                &authentication_request.client_id,
                &client,
                &sub,
                user_claims,
                authentication_request.nonce.as_deref(),
                None,
                Some(&access_token.value),
                extra,
            )
            .map_err(TokenRequestError::Internal)?;

        tracing::debug!(client_id = %authentication_request.client_id, "exchanged authorization code");
        Ok(TokenResponse {
            access_token: access_token.value,
            token_type: access_token.token_type,
            expires_in: access_token.expires_in,
            refresh_token: Some(refresh_token),
            id_token: Some(id_token),
            scope: None,
        })
    }

    /// Mint a new access token from a refresh token, optionally narrowing
    /// the scope.
    async fn token_refresh(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<TokenResponse, TokenRequestError> {
        let token_request = RefreshRequest::from_params(params)?;

        let (access_token, refresh_token) = self
            .authz_state
            .use_refresh_token(
                &token_request.refresh_token,
                token_request.scope.as_deref(),
            )
            .await?;

        tracing::debug!(rotated = refresh_token.is_some(), "refreshed access token");
        Ok(TokenResponse {
            scope: Some(access_token.scope.join(" ")),
            access_token: access_token.value,
            token_type: access_token.token_type,
            expires_in: access_token.expires_in,
            refresh_token,
            id_token: None,
        })
    }

    // ========================================================================
    // UserInfo endpoint
    // ========================================================================

    /// Handle a userinfo request. `request` is the query string (GET) or
    /// form body (POST), used only as the fallback carrier of the
    /// `access_token` parameter.
    pub async fn handle_userinfo_request(
        &self,
        request: Option<&str>,
        http_headers: Option<&HashMap<String, String>>,
    ) -> Result<UserInfoResponse, UserInfoRequestError> {
        let bearer_token = extract_bearer_token(request, http_headers)?;

        let introspection = self.authz_state.introspect_access_token(&bearer_token).await?;
        if !introspection.active {
            return Err(InvalidUserinfoRequest("the access token has expired".to_owned()).into());
        }
        let sub = introspection.sub.ok_or_else(|| {
            UserInfoRequestError::Internal(anyhow!("introspection of an active token had no sub"))
        })?;
        let scope = introspection.scope.unwrap_or_default();

        let user_id = self
            .authz_state
            .get_user_id_for_subject_identifier(&sub)
            .await?;

        let mut requested = scope_to_claims(&scope);
        let authentication_request = self
            .authz_state
            .get_authorization_request_for_access_token(&bearer_token)
            .await?;
        if let Some(userinfo_claims) = authentication_request
            .claims
            .and_then(|claims| claims.userinfo)
        {
            // Claims requested explicitly keep their per-claim metadata.
            for (name, requirement) in userinfo_claims {
                requested.insert(name, requirement);
            }
        }

        let mut claims = self.userinfo.claims_for(&user_id, &requested).await?;
        claims.remove("sub");

        tracing::debug!(client_id = ?introspection.client_id, "served userinfo claims");
        Ok(UserInfoResponse { sub, claims })
    }
}

/// The sector a pairwise subject identifier is scoped to: the network host
/// of the request's redirect URI. A registered `sector_identifier_uri` is
/// never consulted here.
fn sector_identifier(redirect_uri: &str) -> Result<String, AuthorizationError> {
    let url = Url::parse(redirect_uri).map_err(|e| {
        AuthorizationError::Internal(anyhow!("invalid redirect_uri '{redirect_uri}': {e}"))
    })?;
    let host = url.host_str().ok_or_else(|| {
        AuthorizationError::Internal(anyhow!("redirect_uri '{redirect_uri}' has no host"))
    })?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

/// Verify the derived subject identifier against any `sub` requested
/// through the `claims` parameter.
fn check_subject_identifier_matches_requested(
    request: &AuthenticationRequest,
    sub: &str,
) -> Result<(), AuthorizationError> {
    let Some(claims) = &request.claims else {
        return Ok(());
    };
    let id_token_sub = claims.id_token_sub();
    let userinfo_sub = claims.userinfo_sub();

    if let (Some(for_id_token), Some(for_userinfo)) = (id_token_sub, userinfo_sub) {
        if for_id_token != for_userinfo {
            return Err(AuthorizationError::SubjectMismatch(format!(
                "different subject identifiers requested for ID Token and userinfo: {for_id_token} != {for_userinfo}"
            )));
        }
    }
    if let Some(requested) = id_token_sub.or(userinfo_sub) {
        if requested.as_str() != Some(sub) {
            return Err(AuthorizationError::SubjectMismatch(format!(
                "requested subject identifier {requested} could not be matched"
            )));
        }
    }
    Ok(())
}

fn header_value<'a>(
    headers: Option<&'a HashMap<String, String>>,
    name: &str,
) -> Option<&'a str> {
    headers?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Extract the bearer token: the `Authorization` header is preferred, the
/// `access_token` parameter accepted, supplying both (or neither) fails.
fn extract_bearer_token(
    request: Option<&str>,
    http_headers: Option<&HashMap<String, String>>,
) -> Result<String, BearerTokenError> {
    let header_token = match header_value(http_headers, "authorization") {
        Some(header) => Some(
            header
                .strip_prefix("Bearer ")
                .map(str::to_owned)
                .ok_or_else(|| {
                    BearerTokenError("Authorization header is not a Bearer token".to_owned())
                })?,
        ),
        None => None,
    };
    let param_token = request
        .map(parse_form_urlencoded)
        .and_then(|params| params.get("access_token").cloned());

    match (header_token, param_token) {
        (Some(_), Some(_)) => Err(BearerTokenError(
            "access token supplied both in header and parameter".to_owned(),
        )),
        (Some(token), None) | (None, Some(token)) => Ok(token),
        (None, None) => Err(BearerTokenError("no access token supplied".to_owned())),
    }
}
