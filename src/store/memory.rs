//! In-memory collaborator implementations.
//!
//! Suitable for tests and single-process deployments. All authorization
//! state lives behind one mutex, which is what makes code exchange and
//! refresh rotation single-shot under concurrency.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{AccessToken, AuthorizationState, ClientRegistry, Introspection, StoreError, UserInfoSource};
use crate::dto::authorization::AuthenticationRequest;
use crate::models::claims::ClaimRequests;
use crate::models::client::{ClientMetadata, InvalidClientMetadata, SubjectType};
use crate::utils::secret::generate_token;

/// Default authorization code lifetime in seconds
pub const DEFAULT_CODE_LIFETIME_SECS: i64 = 600;

/// Default access token lifetime in seconds
pub const DEFAULT_ACCESS_TOKEN_LIFETIME_SECS: i64 = 3600;

const TOKEN_TYPE_BEARER: &str = "Bearer";

#[derive(Debug, Clone)]
struct CodeGrant {
    request: AuthenticationRequest,
    sub: String,
    expires_at: DateTime<Utc>,
    exchanged: bool,
}

#[derive(Debug, Clone)]
struct TokenGrant {
    request: AuthenticationRequest,
    sub: String,
    scope: Vec<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RefreshGrant {
    request: AuthenticationRequest,
    sub: String,
    scope: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    codes: HashMap<String, CodeGrant>,
    access_tokens: HashMap<String, TokenGrant>,
    refresh_tokens: HashMap<String, RefreshGrant>,
    /// subject identifier → local user id
    subjects: HashMap<String, String>,
}

impl State {
    fn issue_access_token(
        &mut self,
        request: AuthenticationRequest,
        sub: String,
        scope: Vec<String>,
        lifetime: i64,
    ) -> AccessToken {
        let value = generate_token();
        self.access_tokens.insert(
            value.clone(),
            TokenGrant {
                request,
                sub,
                scope: scope.clone(),
                expires_at: Utc::now() + Duration::seconds(lifetime),
            },
        );
        AccessToken {
            value,
            token_type: TOKEN_TYPE_BEARER.to_owned(),
            expires_in: lifetime,
            scope,
        }
    }
}

/// Process-local [`AuthorizationState`].
pub struct InMemoryAuthorizationState {
    inner: Mutex<State>,
    pairwise_salt: String,
    code_lifetime: i64,
    access_token_lifetime: i64,
}

impl InMemoryAuthorizationState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(State::default()),
            pairwise_salt: Uuid::new_v4().to_string(),
            code_lifetime: DEFAULT_CODE_LIFETIME_SECS,
            access_token_lifetime: DEFAULT_ACCESS_TOKEN_LIFETIME_SECS,
        }
    }

    /// Fix the pairwise salt, so subject identifiers survive restarts.
    pub fn with_pairwise_salt(mut self, salt: impl Into<String>) -> Self {
        self.pairwise_salt = salt.into();
        self
    }

    pub fn with_lifetimes(mut self, code_lifetime: i64, access_token_lifetime: i64) -> Self {
        self.code_lifetime = code_lifetime;
        self.access_token_lifetime = access_token_lifetime;
        self
    }

    fn locked(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Internal(anyhow!("authorization state lock poisoned")))
    }

    fn hash_subject(&self, input: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(input.as_bytes()))
    }
}

impl Default for InMemoryAuthorizationState {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorizationState for InMemoryAuthorizationState {
    async fn create_authorization_code(
        &self,
        request: &AuthenticationRequest,
        sub: &str,
    ) -> Result<String, StoreError> {
        let mut state = self.locked()?;
        let code = generate_token();
        state.codes.insert(
            code.clone(),
            CodeGrant {
                request: request.clone(),
                sub: sub.to_owned(),
                expires_at: Utc::now() + Duration::seconds(self.code_lifetime),
                exchanged: false,
            },
        );
        Ok(code)
    }

    async fn create_access_token(
        &self,
        request: &AuthenticationRequest,
        sub: &str,
    ) -> Result<AccessToken, StoreError> {
        let mut state = self.locked()?;
        let scope = request.scope.clone();
        Ok(state.issue_access_token(
            request.clone(),
            sub.to_owned(),
            scope,
            self.access_token_lifetime,
        ))
    }

    async fn create_refresh_token(&self, access_token_value: &str) -> Result<String, StoreError> {
        let mut state = self.locked()?;
        let grant = state
            .access_tokens
            .get(access_token_value)
            .ok_or(StoreError::UnknownAccessToken)?;
        let refresh_grant = RefreshGrant {
            request: grant.request.clone(),
            sub: grant.sub.clone(),
            scope: grant.scope.clone(),
        };
        let value = generate_token();
        state.refresh_tokens.insert(value.clone(), refresh_grant);
        Ok(value)
    }

    async fn exchange_code_for_token(&self, code: &str) -> Result<AccessToken, StoreError> {
        let mut state = self.locked()?;
        let grant = state.codes.get_mut(code).ok_or(StoreError::UnknownCode)?;
        if grant.exchanged {
            return Err(StoreError::CodeConsumed);
        }
        if grant.expires_at < Utc::now() {
            return Err(StoreError::UnknownCode);
        }
        grant.exchanged = true;
        let request = grant.request.clone();
        let sub = grant.sub.clone();
        let scope = request.scope.clone();
        Ok(state.issue_access_token(request, sub, scope, self.access_token_lifetime))
    }

    async fn use_refresh_token(
        &self,
        refresh_token: &str,
        scope: Option<&[String]>,
    ) -> Result<(AccessToken, Option<String>), StoreError> {
        let mut state = self.locked()?;
        let grant = state
            .refresh_tokens
            .get(refresh_token)
            .ok_or(StoreError::UnknownRefreshToken)?;

        let effective_scope = match scope {
            Some(requested) => {
                let exceeded: Vec<String> = requested
                    .iter()
                    .filter(|value| !grant.scope.contains(*value))
                    .cloned()
                    .collect();
                if !exceeded.is_empty() {
                    return Err(StoreError::ScopeExceeded(exceeded.join(" ")));
                }
                requested.to_vec()
            }
            None => grant.scope.clone(),
        };

        // Rotation: the presented value is consumed, a replacement issued.
        let grant = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or(StoreError::UnknownRefreshToken)?;
        let access_token = state.issue_access_token(
            grant.request.clone(),
            grant.sub.clone(),
            effective_scope.clone(),
            self.access_token_lifetime,
        );
        let replacement = generate_token();
        state.refresh_tokens.insert(
            replacement.clone(),
            RefreshGrant {
                request: grant.request,
                sub: grant.sub,
                scope: effective_scope,
            },
        );
        Ok((access_token, Some(replacement)))
    }

    async fn get_authorization_request_for_code(
        &self,
        code: &str,
    ) -> Result<AuthenticationRequest, StoreError> {
        let state = self.locked()?;
        let grant = state.codes.get(code).ok_or(StoreError::UnknownCode)?;
        if grant.expires_at < Utc::now() {
            return Err(StoreError::UnknownCode);
        }
        Ok(grant.request.clone())
    }

    async fn get_subject_identifier_for_code(&self, code: &str) -> Result<String, StoreError> {
        let state = self.locked()?;
        let grant = state.codes.get(code).ok_or(StoreError::UnknownCode)?;
        Ok(grant.sub.clone())
    }

    async fn get_user_id_for_subject_identifier(&self, sub: &str) -> Result<String, StoreError> {
        let state = self.locked()?;
        state
            .subjects
            .get(sub)
            .cloned()
            .ok_or(StoreError::UnknownSubject)
    }

    async fn get_authorization_request_for_access_token(
        &self,
        access_token_value: &str,
    ) -> Result<AuthenticationRequest, StoreError> {
        let state = self.locked()?;
        state
            .access_tokens
            .get(access_token_value)
            .map(|grant| grant.request.clone())
            .ok_or(StoreError::UnknownAccessToken)
    }

    async fn introspect_access_token(
        &self,
        access_token_value: &str,
    ) -> Result<Introspection, StoreError> {
        let state = self.locked()?;
        let grant = match state.access_tokens.get(access_token_value) {
            Some(grant) if grant.expires_at >= Utc::now() => grant,
            _ => return Ok(Introspection::default()),
        };
        Ok(Introspection {
            active: true,
            scope: Some(grant.scope.clone()),
            client_id: Some(grant.request.client_id.clone()),
            sub: Some(grant.sub.clone()),
            exp: Some(grant.expires_at.timestamp()),
        })
    }

    async fn get_subject_identifier(
        &self,
        subject_type: SubjectType,
        user_id: &str,
        sector_identifier: &str,
    ) -> Result<String, StoreError> {
        let sub = match subject_type {
            SubjectType::Public => {
                self.hash_subject(&format!("{user_id}{}", self.pairwise_salt))
            }
            SubjectType::Pairwise => self.hash_subject(&format!(
                "{sector_identifier}{user_id}{}",
                self.pairwise_salt
            )),
        };
        let mut state = self.locked()?;
        state.subjects.insert(sub.clone(), user_id.to_owned());
        Ok(sub)
    }
}

/// Process-local [`ClientRegistry`] over a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemoryClientRegistry {
    clients: HashMap<String, ClientMetadata>,
}

impl InMemoryClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a client registration.
    pub fn register(
        &mut self,
        client_id: impl Into<String>,
        metadata: ClientMetadata,
    ) -> Result<(), InvalidClientMetadata> {
        metadata.validate()?;
        self.clients.insert(client_id.into(), metadata);
        Ok(())
    }
}

#[async_trait]
impl ClientRegistry for InMemoryClientRegistry {
    async fn lookup(&self, client_id: &str) -> Option<ClientMetadata> {
        self.clients.get(client_id).cloned()
    }
}

/// [`UserInfoSource`] over a static map of user claims.
#[derive(Debug, Default)]
pub struct StaticUserInfo {
    users: HashMap<String, Map<String, Value>>,
}

impl StaticUserInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&mut self, user_id: impl Into<String>, claims: Map<String, Value>) {
        self.users.insert(user_id.into(), claims);
    }
}

#[async_trait]
impl UserInfoSource for StaticUserInfo {
    async fn claims_for(
        &self,
        user_id: &str,
        requested: &ClaimRequests,
    ) -> Result<Map<String, Value>, StoreError> {
        let known = self.users.get(user_id).ok_or(StoreError::UnknownUser)?;
        let mut claims = Map::new();
        for name in requested.keys() {
            if let Some(value) = known.get(name) {
                claims.insert(name.clone(), value.clone());
            }
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::models::claims::scope_to_claims;

    fn request() -> AuthenticationRequest {
        AuthenticationRequest {
            client_id: "c1".to_owned(),
            redirect_uri: "https://rp.example.com/cb".to_owned(),
            response_type: "code".parse().unwrap(),
            scope: vec!["openid".to_owned(), "profile".to_owned()],
            state: None,
            nonce: None,
            claims: None,
        }
    }

    #[tokio::test]
    async fn test_code_exchange_is_single_use() {
        let state = InMemoryAuthorizationState::new();
        let code = state.create_authorization_code(&request(), "sub-1").await.unwrap();

        let token = state.exchange_code_for_token(&code).await.unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, DEFAULT_ACCESS_TOKEN_LIFETIME_SECS);

        let second = state.exchange_code_for_token(&code).await;
        assert!(matches!(second, Err(StoreError::CodeConsumed)));
    }

    #[tokio::test]
    async fn test_concurrent_code_exchange_has_one_winner() {
        let state = Arc::new(InMemoryAuthorizationState::new());
        let code = state.create_authorization_code(&request(), "sub-1").await.unwrap();

        let first = tokio::spawn({
            let state = Arc::clone(&state);
            let code = code.clone();
            async move { state.exchange_code_for_token(&code).await }
        });
        let second = tokio::spawn({
            let state = Arc::clone(&state);
            let code = code.clone();
            async move { state.exchange_code_for_token(&code).await }
        });

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        let successes = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let state = InMemoryAuthorizationState::new().with_lifetimes(-1, 3600);
        let code = state.create_authorization_code(&request(), "sub-1").await.unwrap();
        assert!(matches!(
            state.exchange_code_for_token(&code).await,
            Err(StoreError::UnknownCode)
        ));
        assert!(state.get_authorization_request_for_code(&code).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_rotation_consumes_old_value() {
        let state = InMemoryAuthorizationState::new();
        let access = state.create_access_token(&request(), "sub-1").await.unwrap();
        let refresh = state.create_refresh_token(&access.value).await.unwrap();

        let (new_access, replacement) = state.use_refresh_token(&refresh, None).await.unwrap();
        assert_ne!(new_access.value, access.value);
        let replacement = replacement.unwrap();
        assert_ne!(replacement, refresh);

        assert!(matches!(
            state.use_refresh_token(&refresh, None).await,
            Err(StoreError::UnknownRefreshToken)
        ));
        assert!(state.use_refresh_token(&replacement, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_scope_narrowing() {
        let state = InMemoryAuthorizationState::new();
        let access = state.create_access_token(&request(), "sub-1").await.unwrap();
        let refresh = state.create_refresh_token(&access.value).await.unwrap();

        let narrowed = vec!["openid".to_owned()];
        let (new_access, _) = state.use_refresh_token(&refresh, Some(&narrowed)).await.unwrap();
        assert_eq!(new_access.scope, narrowed);
    }

    #[tokio::test]
    async fn test_refresh_scope_superset_is_rejected_without_consuming() {
        let state = InMemoryAuthorizationState::new();
        let access = state.create_access_token(&request(), "sub-1").await.unwrap();
        let refresh = state.create_refresh_token(&access.value).await.unwrap();

        let widened = vec!["openid".to_owned(), "writer".to_owned()];
        let error = state.use_refresh_token(&refresh, Some(&widened)).await.unwrap_err();
        assert!(matches!(error, StoreError::ScopeExceeded(ref s) if s == "writer"));

        // The failed narrowing attempt must not burn the refresh token.
        assert!(state.use_refresh_token(&refresh, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_introspection_active_and_expired() {
        let state = InMemoryAuthorizationState::new();
        let access = state.create_access_token(&request(), "sub-1").await.unwrap();

        let introspection = state.introspect_access_token(&access.value).await.unwrap();
        assert!(introspection.active);
        assert_eq!(introspection.sub.as_deref(), Some("sub-1"));
        assert_eq!(introspection.client_id.as_deref(), Some("c1"));

        let unknown = state.introspect_access_token("nope").await.unwrap();
        assert!(!unknown.active);
        assert!(unknown.sub.is_none());

        let expired_state = InMemoryAuthorizationState::new().with_lifetimes(600, -1);
        let expired = expired_state.create_access_token(&request(), "sub-1").await.unwrap();
        let introspection = expired_state.introspect_access_token(&expired.value).await.unwrap();
        assert!(!introspection.active);
    }

    #[tokio::test]
    async fn test_pairwise_subject_identifiers_differ_per_sector() {
        let state = InMemoryAuthorizationState::new();

        let rp1 = state
            .get_subject_identifier(SubjectType::Pairwise, "user1", "rp1.example.com")
            .await
            .unwrap();
        let rp1_again = state
            .get_subject_identifier(SubjectType::Pairwise, "user1", "rp1.example.com")
            .await
            .unwrap();
        let rp2 = state
            .get_subject_identifier(SubjectType::Pairwise, "user1", "rp2.example.com")
            .await
            .unwrap();

        assert_eq!(rp1, rp1_again);
        assert_ne!(rp1, rp2);

        assert_eq!(
            state.get_user_id_for_subject_identifier(&rp1).await.unwrap(),
            "user1"
        );
    }

    #[tokio::test]
    async fn test_public_subject_identifier_is_sector_independent() {
        let state = InMemoryAuthorizationState::new();

        let rp1 = state
            .get_subject_identifier(SubjectType::Public, "user1", "rp1.example.com")
            .await
            .unwrap();
        let rp2 = state
            .get_subject_identifier(SubjectType::Public, "user1", "rp2.example.com")
            .await
            .unwrap();
        let other_user = state
            .get_subject_identifier(SubjectType::Public, "user2", "rp1.example.com")
            .await
            .unwrap();

        assert_eq!(rp1, rp2);
        assert_ne!(rp1, other_user);
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let mut registry = InMemoryClientRegistry::new();
        let mut metadata = ClientMetadata::new(
            vec!["https://rp.example.com/cb".to_owned()],
            vec!["code".parse().unwrap()],
        );
        metadata.client_secret = Some("s3cret".to_owned());
        registry.register("c1", metadata).unwrap();

        assert!(registry.lookup("c1").await.is_some());
        assert!(registry.lookup("c2").await.is_none());
    }

    #[tokio::test]
    async fn test_registry_rejects_invalid_metadata() {
        let mut registry = InMemoryClientRegistry::new();
        let metadata = ClientMetadata::new(vec![], vec!["code".parse().unwrap()]);
        assert!(registry.register("c1", metadata).is_err());
    }

    #[tokio::test]
    async fn test_static_userinfo_projects_requested_claims() {
        let mut userinfo = StaticUserInfo::new();
        let mut claims = Map::new();
        claims.insert("name".to_owned(), json!("Jane Doe"));
        claims.insert("email".to_owned(), json!("jane@example.com"));
        claims.insert("birthdate".to_owned(), json!("1990-01-01"));
        userinfo.insert_user("user1", claims);

        let requested = scope_to_claims(&["email".to_owned()]);
        let resolved = userinfo.claims_for("user1", &requested).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["email"], "jane@example.com");

        assert!(matches!(
            userinfo.claims_for("ghost", &requested).await,
            Err(StoreError::UnknownUser)
        ));
    }
}
