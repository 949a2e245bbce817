//! Bearer token validation.
//!
//! The provider is the only authority on whether a token is live. Validation
//! runs in this order:
//!
//! 1. Userinfo. A profile with subject and email resolves to a user. Known
//!    users are read, not rewritten; profile refreshes happen on login.
//! 2. Confirmation. Introspection when configured, otherwise the userinfo
//!    outcome (a JSON body, or a 403 meaning "recognised but no `openid`").
//! 3. Scopes, from the confirmation source or, failing that, from the JWT
//!    payload of the confirmed token.
//! 4. The required scope. Without it the token is rejected as
//!    `InsufficientScope`; with it the caller is a service account.
//!
//! JWT claims are never trusted on their own: they are only readable through a
//! [`ConfirmedToken`], which only step 2 can produce.

use crate::claims::ProviderClaims;
use crate::client::{ProviderClient, UserinfoOutcome};
use crate::error::TokenValidationError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use fern_gate_access::{AuthenticatedCaller, AuthenticationError, IdentityResolver};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A bearer token the provider has confirmed as active.
#[derive(Debug)]
pub struct ConfirmedToken {
    raw: String,
}

impl ConfirmedToken {
    fn confirmed(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
        }
    }

    /// Scopes from the token's JWT payload (`scp` or `scope`).
    ///
    /// Opaque or malformed tokens yield no scopes. The signature is not
    /// checked; the provider already vouched for the token.
    #[must_use]
    pub fn jwt_scopes(&self) -> Vec<String> {
        let mut parts = self.raw.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Vec::new();
        };
        URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
            .map(|claims| scopes_from_claims(&claims))
            .unwrap_or_default()
    }
}

/// Reads scopes from a claims object: `scp` (array or string) first, then `scope`.
fn scopes_from_claims(claims: &Value) -> Vec<String> {
    fn list(value: &Value) -> Vec<String> {
        match value {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }

    let scp = claims.get("scp").map(list).unwrap_or_default();
    if !scp.is_empty() {
        return scp;
    }
    claims.get("scope").map(list).unwrap_or_default()
}

type ValidationResult<T> = fern_gate_core::Result<T, TokenValidationError>;

/// Resolves bearer tokens to callers.
#[derive(Clone)]
pub struct TokenValidationChain {
    client: Arc<ProviderClient>,
    resolver: IdentityResolver,
}

impl TokenValidationChain {
    #[must_use]
    pub fn new(client: Arc<ProviderClient>, resolver: IdentityResolver) -> Self {
        Self { client, resolver }
    }

    /// Validates `token` and returns the caller it represents.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the provider does not confirm the token as active
    /// - `InsufficientScope` if it is active but lacks the required scope
    /// - `Provider` if the provider could not be consulted
    /// - `StoreUnavailable` if the token's user could not be looked up
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> ValidationResult<AuthenticatedCaller> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenValidationError::InvalidToken.into());
        }

        let userinfo = match self.client.userinfo(token).await {
            Ok(outcome) => Some(outcome),
            Err(e) if self.client.can_introspect() => {
                warn!(error = %e.current_context(), "userinfo unavailable, relying on introspection");
                None
            }
            Err(e) => {
                return Err(TokenValidationError::Provider {
                    details: e.current_context().to_string(),
                }
                .into());
            }
        };

        if let Some(UserinfoOutcome::Profile(body)) = &userinfo {
            if let Some(caller) = self.resolve_profile(body).await? {
                return Ok(caller);
            }
        }

        let (confirmed, mut scopes) = self.confirm(token, userinfo).await?;
        if scopes.is_empty() {
            scopes = confirmed.jwt_scopes();
        }

        let required = self.client.config().required_scope();
        if !scopes.iter().any(|s| s == required) {
            debug!(scopes = ?scopes, "token lacks required scope");
            return Err(TokenValidationError::InsufficientScope {
                required: required.to_string(),
            }
            .into());
        }

        debug!("authenticated service account");
        Ok(AuthenticatedCaller::service_account(scopes))
    }

    async fn resolve_profile(&self, body: &Value) -> ValidationResult<Option<AuthenticatedCaller>> {
        let claims = match ProviderClaims::from_json(body, self.client.config().claims()) {
            Ok(claims) if claims.has_profile() => claims,
            Ok(_) => {
                debug!("userinfo carries no user profile");
                return Ok(None);
            }
            Err(e) => {
                debug!(error = %e.current_context(), "userinfo claims not usable");
                return Ok(None);
            }
        };

        let scopes = scopes_from_claims(body);
        let resolved = self
            .resolver
            .find_or_register(&claims.into_identity())
            .await
            .map_err(|e| match e.current_context() {
                AuthenticationError::StoreUnavailable { details } => {
                    TokenValidationError::StoreUnavailable {
                        details: details.clone(),
                    }
                }
                other => {
                    debug!(error = %other, "userinfo identity not usable");
                    TokenValidationError::InvalidToken
                }
            })?;

        if !resolved.user.is_active() {
            warn!(user_id = %resolved.user.id(), "bearer token for inactive user");
            return Err(TokenValidationError::InvalidToken.into());
        }
        Ok(Some(AuthenticatedCaller::from_token(resolved.user, scopes)))
    }

    async fn confirm(
        &self,
        token: &str,
        userinfo: Option<UserinfoOutcome>,
    ) -> ValidationResult<(ConfirmedToken, Vec<String>)> {
        if self.client.can_introspect() {
            let result = self.client.introspect(token).await.map_err(|e| {
                TokenValidationError::Provider {
                    details: e.current_context().to_string(),
                }
            })?;
            if !result.active {
                debug!("introspection reports inactive token");
                return Err(TokenValidationError::InvalidToken.into());
            }
            return Ok((ConfirmedToken::confirmed(token), result.scopes()));
        }

        match userinfo {
            Some(UserinfoOutcome::Profile(body)) => {
                Ok((ConfirmedToken::confirmed(token), scopes_from_claims(&body)))
            }
            Some(UserinfoOutcome::Forbidden(body)) => Ok((
                ConfirmedToken::confirmed(token),
                body.as_ref().map(scopes_from_claims).unwrap_or_default(),
            )),
            Some(UserinfoOutcome::Unauthorized) | None => {
                Err(TokenValidationError::InvalidToken.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::http_client;
    use crate::config::OAuthConfig;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use fern_gate_access::store::StoreResult;
    use fern_gate_access::{
        InMemoryUserStore, ProjectPermission, RoleMapping, ScopeGrant, StoreError, User, UserStore,
    };
    use fern_gate_core::UserId;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwt(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    fn chain(server: &MockServer, introspect: bool) -> (TokenValidationChain, Arc<InMemoryUserStore>) {
        let users = Arc::new(InMemoryUserStore::new());
        (chain_over(server, introspect, users.clone()), users)
    }

    fn chain_over(
        server: &MockServer,
        introspect: bool,
        users: Arc<dyn UserStore>,
    ) -> TokenValidationChain {
        let mut builder = OAuthConfig::builder("fern", "https://app.example.com/auth/callback")
            .endpoints(
                format!("{}/authorize", server.uri()),
                format!("{}/token", server.uri()),
                format!("{}/userinfo", server.uri()),
            )
            .client_secret("secret");
        if introspect {
            builder = builder.introspection_url(format!("{}/introspect", server.uri()));
        }
        let http = http_client(Duration::from_secs(5)).expect("http client");
        let client = ProviderClient::new(Arc::new(builder.build()), http).expect("client");
        let resolver = IdentityResolver::new(users, Arc::new(RoleMapping::new()));
        TokenValidationChain::new(Arc::new(client), resolver)
    }

    /// User store whose backing database is down.
    struct DownUsers;

    fn down<T>() -> StoreResult<T> {
        Err(StoreError::Unavailable {
            details: "connection refused".to_string(),
        }
        .into())
    }

    #[async_trait]
    impl UserStore for DownUsers {
        async fn create(&self, _: &User) -> StoreResult<()> {
            down()
        }
        async fn update(&self, _: &User) -> StoreResult<()> {
            down()
        }
        async fn find_by_id(&self, _: &UserId) -> StoreResult<User> {
            down()
        }
        async fn find_by_email(&self, _: &str) -> StoreResult<User> {
            down()
        }
        async fn set_groups(&self, _: &UserId, _: &[String]) -> StoreResult<()> {
            down()
        }
        async fn grant_scope(&self, _: &ScopeGrant) -> StoreResult<()> {
            down()
        }
        async fn revoke_scope(&self, _: &UserId, _: &str) -> StoreResult<u64> {
            down()
        }
        async fn list_scopes(&self, _: &UserId) -> StoreResult<Vec<ScopeGrant>> {
            down()
        }
        async fn grant_project_permission(&self, _: &ProjectPermission) -> StoreResult<()> {
            down()
        }
        async fn list_project_permissions(&self, _: &UserId) -> StoreResult<Vec<ProjectPermission>> {
            down()
        }
        async fn update_last_login(&self, _: &UserId, _: DateTime<Utc>) -> StoreResult<()> {
            down()
        }
    }

    async fn mount_profile(server: &MockServer, body: Value) {
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_userinfo(server: &MockServer, status: u16) {
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    async fn mount_introspection(server: &MockServer, body: Value) {
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn jwt_scopes_read_scp_then_scope() {
        let token = ConfirmedToken::confirmed(&jwt(&json!({"scp": ["fern-read", "x"]})));
        assert_eq!(token.jwt_scopes(), ["fern-read", "x"]);

        let token = ConfirmedToken::confirmed(&jwt(&json!({"scope": "openid fern-read"})));
        assert_eq!(token.jwt_scopes(), ["openid", "fern-read"]);

        let token = ConfirmedToken::confirmed(&jwt(&json!({"scp": "a b"})));
        assert_eq!(token.jwt_scopes(), ["a", "b"]);
    }

    #[test]
    fn opaque_tokens_have_no_jwt_scopes() {
        assert!(ConfirmedToken::confirmed("opaque-token").jwt_scopes().is_empty());
        assert!(ConfirmedToken::confirmed("a.!!!.c").jwt_scopes().is_empty());
        assert!(ConfirmedToken::confirmed("a.b.c.d").jwt_scopes().is_empty());
    }

    #[tokio::test]
    async fn introspected_service_token_with_required_scope() {
        let server = MockServer::start().await;
        mount_userinfo(&server, 401).await;
        mount_introspection(&server, json!({"active": true, "scope": "fern-read other"})).await;
        let (chain, users) = chain(&server, true);

        let caller = chain.validate("svc-token").await.expect("valid");

        assert!(caller.is_service_account());
        assert_eq!(caller.subject(), "service-account");
        assert_eq!(caller.scopes(), ["fern-read", "other"]);
        assert!(users.is_empty().await);
    }

    #[tokio::test]
    async fn introspected_token_without_required_scope() {
        let server = MockServer::start().await;
        mount_userinfo(&server, 401).await;
        mount_introspection(&server, json!({"active": true, "scope": "other"})).await;
        let (chain, _) = chain(&server, true);

        let err = chain.validate("svc-token").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &TokenValidationError::InsufficientScope {
                required: "fern-read".to_string()
            }
        );
    }

    #[tokio::test]
    async fn inactive_token_is_invalid_not_insufficient() {
        let server = MockServer::start().await;
        mount_userinfo(&server, 401).await;
        mount_introspection(&server, json!({"active": false})).await;
        let (chain, _) = chain(&server, true);

        let err = chain.validate("revoked").await.unwrap_err();

        assert_eq!(err.current_context(), &TokenValidationError::InvalidToken);
    }

    #[tokio::test]
    async fn userinfo_forbidden_confirms_and_jwt_supplies_scopes() {
        let server = MockServer::start().await;
        mount_userinfo(&server, 403).await;
        let (chain, _) = chain(&server, false);
        let token = jwt(&json!({"sub": "svc", "scp": ["fern-read"]}));

        let caller = chain.validate(&token).await.expect("valid");

        assert!(caller.is_service_account());
    }

    #[tokio::test]
    async fn userinfo_forbidden_without_scope_is_insufficient() {
        let server = MockServer::start().await;
        mount_userinfo(&server, 403).await;
        let (chain, _) = chain(&server, false);
        let token = jwt(&json!({"sub": "svc", "scope": "profile"}));

        let err = chain.validate(&token).await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            TokenValidationError::InsufficientScope { .. }
        ));
    }

    #[tokio::test]
    async fn unauthorized_without_introspection_is_invalid() {
        let server = MockServer::start().await;
        mount_userinfo(&server, 401).await;
        let (chain, _) = chain(&server, false);
        let token = jwt(&json!({"scp": ["fern-read"]}));

        let err = chain.validate(&token).await.unwrap_err();

        assert_eq!(err.current_context(), &TokenValidationError::InvalidToken);
    }

    #[tokio::test]
    async fn empty_token_is_invalid_without_provider_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (chain, _) = chain(&server, false);

        let err = chain.validate("   ").await.unwrap_err();

        assert_eq!(err.current_context(), &TokenValidationError::InvalidToken);
    }

    #[tokio::test]
    async fn user_profile_resolves_to_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "u1",
                "email": "u1@example.com",
                "groups": ["team1-users"],
            })))
            .mount(&server)
            .await;
        let (chain, users) = chain(&server, false);

        let caller = chain.validate("user-token").await.expect("valid");

        assert!(!caller.is_service_account());
        assert_eq!(caller.subject(), "u1");
        let stored = users.find_by_id(&UserId::new("u1")).await.expect("stored");
        assert_eq!(stored.groups(), ["team1-users".to_string()]);
    }

    #[tokio::test]
    async fn provider_outage_without_introspection_is_provider_error() {
        let server = MockServer::start().await;
        mount_userinfo(&server, 503).await;
        let (chain, _) = chain(&server, false);

        let err = chain.validate("any").await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            TokenValidationError::Provider { .. }
        ));
    }

    #[tokio::test]
    async fn bearer_for_known_user_leaves_record_untouched() {
        let server = MockServer::start().await;
        mount_profile(
            &server,
            json!({"sub": "u1", "email": "u1@example.com", "groups": ["admin"]}),
        )
        .await;
        let (chain, users) = chain(&server, false);
        let mut seeded = User::new(UserId::new("u1"), "u1@example.com");
        seeded.set_groups(vec!["team1-users".to_string()]);
        users.create(&seeded).await.expect("seed");

        let caller = chain.validate("user-token").await.expect("valid");

        assert_eq!(caller.subject(), "u1");
        assert!(!caller.is_admin());
        let stored = users.find_by_id(&UserId::new("u1")).await.expect("stored");
        assert_eq!(stored.groups(), ["team1-users".to_string()]);
        assert!(stored.last_login_at().is_none());
    }

    #[tokio::test]
    async fn user_store_outage_is_not_reported_as_provider_error() {
        let server = MockServer::start().await;
        mount_profile(&server, json!({"sub": "u1", "email": "u1@example.com"})).await;
        let chain = chain_over(&server, false, Arc::new(DownUsers));

        let err = chain.validate("user-token").await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            TokenValidationError::StoreUnavailable { .. }
        ));
        assert_eq!(err.current_context().code(), "store_unavailable");
    }

    #[tokio::test]
    async fn profile_without_email_falls_through_to_service_account() {
        let server = MockServer::start().await;
        mount_profile(&server, json!({"sub": "svc-client", "scope": "fern-read"})).await;
        let (chain, users) = chain(&server, false);

        let caller = chain.validate("svc-token").await.expect("valid");

        assert!(caller.is_service_account());
        assert_eq!(caller.scopes(), ["fern-read"]);
        assert!(users.is_empty().await);
    }
}
