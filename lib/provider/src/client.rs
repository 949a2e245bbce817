//! HTTP client for the identity provider.
//!
//! Wraps the endpoints the relying party calls: authorization URL
//! construction, code exchange, userinfo, RFC 7662 introspection, and OIDC
//! discovery. Every call is a single attempt bounded by the client timeout.

use crate::config::{DiscoveredEndpoints, OAuthConfig};
use crate::error::{ConfigurationError, ProviderError};
use fern_gate_access::TokenSet;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use openidconnect::IssuerUrl;
use openidconnect::core::CoreProviderMetadata;
use reqwest::StatusCode;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Extra token endpoint fields: the OIDC ID token, if the provider sent one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type ProviderTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type UnconfiguredClient = oauth2::Client<
    BasicErrorResponse,
    ProviderTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

type ProviderOAuthClient = oauth2::Client<
    BasicErrorResponse,
    ProviderTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Result of a userinfo call.
#[derive(Debug, Clone, PartialEq)]
pub enum UserinfoOutcome {
    /// 2xx with a JSON body.
    Profile(Value),
    /// 403: the token is recognised but lacks `openid`. The body, if JSON, is kept.
    Forbidden(Option<Value>),
    /// 401: the provider does not accept the token here.
    Unauthorized,
}

/// RFC 7662 introspection response, reduced to what validation needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Introspection {
    /// Space-separated `scope` split into a list.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

/// Builds the HTTP client used for provider calls.
///
/// Redirects are not followed.
///
/// # Errors
///
/// Returns `Discovery` if the TLS backend cannot be initialised.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, Report<ProviderError>> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| {
            ProviderError::Discovery {
                details: format!("failed to create HTTP client: {e}"),
            }
            .into()
        })
}

/// Discovers the provider's endpoints from its issuer URL.
///
/// # Errors
///
/// Returns `Discovery` if the issuer is invalid or the metadata cannot be fetched.
#[instrument(skip(http))]
pub async fn discover(
    issuer: &str,
    http: &reqwest::Client,
) -> Result<DiscoveredEndpoints, Report<ProviderError>> {
    let issuer_url = IssuerUrl::new(issuer.to_string()).map_err(|e| ProviderError::Discovery {
        details: format!("invalid issuer URL: {e}"),
    })?;

    let metadata = CoreProviderMetadata::discover_async(issuer_url, http)
        .await
        .map_err(|e| ProviderError::Discovery {
            details: format!("failed to discover provider: {e}"),
        })?;

    Ok(DiscoveredEndpoints {
        auth_url: Some(metadata.authorization_endpoint().url().to_string()),
        token_url: metadata.token_endpoint().map(|u| u.url().to_string()),
        userinfo_url: metadata.userinfo_endpoint().map(|u| u.url().to_string()),
    })
}

/// Client for one configured identity provider.
pub struct ProviderClient {
    config: Arc<OAuthConfig>,
    http: reqwest::Client,
    oauth: ProviderOAuthClient,
}

impl ProviderClient {
    /// Creates a client from a validated, enabled configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if an endpoint is missing or malformed.
    pub fn new(
        config: Arc<OAuthConfig>,
        http: reqwest::Client,
    ) -> Result<Self, Report<ConfigurationError>> {
        let auth_url = AuthUrl::new(required(config.auth_url(), "auth_url")?.to_string())
            .map_err(|e| invalid_url("auth_url", &e))?;
        let token_url = TokenUrl::new(required(config.token_url(), "token_url")?.to_string())
            .map_err(|e| invalid_url("token_url", &e))?;
        let redirect_url = RedirectUrl::new(config.redirect_url().to_string())
            .map_err(|e| invalid_url("redirect_url", &e))?;

        let mut oauth: ProviderOAuthClient =
            UnconfiguredClient::new(ClientId::new(config.client_id().to_string()))
                .set_auth_uri(auth_url)
                .set_token_uri(token_url)
                .set_redirect_uri(redirect_url);
        if let Some(secret) = config.client_secret() {
            oauth = oauth.set_client_secret(ClientSecret::new(secret.to_string()));
        }

        Ok(Self {
            config,
            http,
            oauth,
        })
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Builds the provider authorization URL for `state`.
    ///
    /// The PKCE challenge, when given, is sent with method S256.
    #[must_use]
    pub fn authorization_url(&self, state: String, pkce: Option<PkceCodeChallenge>) -> String {
        let mut request = self
            .oauth
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(self.config.scopes().into_iter().map(Scope::new));
        if let Some(challenge) = pkce {
            request = request.set_pkce_challenge(challenge);
        }
        let (url, _state) = request.url();
        url.to_string()
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// The PKCE verifier is sent iff one is given.
    ///
    /// # Errors
    ///
    /// Returns `ExchangeFailed` if the token endpoint rejects the code or is unreachable.
    #[instrument(skip_all)]
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<TokenSet, Report<ProviderError>> {
        let mut request = self
            .oauth
            .exchange_code(AuthorizationCode::new(code.to_string()));
        if let Some(verifier) = pkce_verifier {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()));
        }

        let response = request
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::ExchangeFailed {
                details: e.to_string(),
            })?;

        debug!(
            has_refresh_token = response.refresh_token().is_some(),
            has_id_token = response.extra_fields().id_token.is_some(),
            "code exchanged"
        );

        Ok(TokenSet {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            id_token: response.extra_fields().id_token.clone(),
            expires_in: response.expires_in(),
        })
    }

    /// Calls the userinfo endpoint with `access_token`.
    ///
    /// # Errors
    ///
    /// Returns `UserinfoFailed` for transport failures and statuses other than
    /// 2xx, 401, and 403; `InvalidResponse` for a 2xx without a JSON body.
    #[instrument(skip_all)]
    pub async fn userinfo(&self, access_token: &str) -> Result<UserinfoOutcome, Report<ProviderError>> {
        let Some(url) = self.config.userinfo_url() else {
            return Err(ProviderError::UserinfoFailed {
                details: "no userinfo endpoint configured".to_string(),
            }
            .into());
        };

        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::UserinfoFailed {
                details: e.to_string(),
            })?;

        let status = response.status();
        match status {
            s if s.is_success() => {
                let body = response
                    .json::<Value>()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse {
                        details: format!("userinfo body: {e}"),
                    })?;
                Ok(UserinfoOutcome::Profile(body))
            }
            StatusCode::FORBIDDEN => {
                debug!("userinfo returned 403");
                Ok(UserinfoOutcome::Forbidden(response.json::<Value>().await.ok()))
            }
            StatusCode::UNAUTHORIZED => {
                debug!("userinfo returned 401");
                Ok(UserinfoOutcome::Unauthorized)
            }
            other => Err(ProviderError::UserinfoFailed {
                details: format!("unexpected status {other}"),
            }
            .into()),
        }
    }

    /// True if an introspection endpoint is configured.
    #[must_use]
    pub fn can_introspect(&self) -> bool {
        self.config.introspection_url().is_some()
    }

    /// Introspects `token` (RFC 7662).
    ///
    /// Confidential clients authenticate with HTTP basic auth; public clients
    /// send their client id in the form.
    ///
    /// # Errors
    ///
    /// Returns `IntrospectionFailed` if the endpoint is missing, unreachable, or
    /// answers with a non-2xx status, and `InvalidResponse` for an undecodable body.
    #[instrument(skip_all)]
    pub async fn introspect(&self, token: &str) -> Result<Introspection, Report<ProviderError>> {
        let Some(url) = self.config.introspection_url() else {
            return Err(ProviderError::IntrospectionFailed {
                details: "no introspection endpoint configured".to_string(),
            }
            .into());
        };

        let mut form = vec![("token", token), ("token_type_hint", "access_token")];
        let mut request = self.http.post(url);
        match self.config.client_secret() {
            Some(secret) => request = request.basic_auth(self.config.client_id(), Some(secret)),
            None => form.push(("client_id", self.config.client_id())),
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::IntrospectionFailed {
                details: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::IntrospectionFailed {
                details: format!("unexpected status {}", response.status()),
            }
            .into());
        }

        response
            .json::<Introspection>()
            .await
            .map_err(|e| {
                ProviderError::InvalidResponse {
                    details: format!("introspection body: {e}"),
                }
                .into()
            })
    }
}

fn required<'a>(
    value: Option<&'a str>,
    field: &'static str,
) -> Result<&'a str, Report<ConfigurationError>> {
    value.ok_or_else(|| ConfigurationError::Missing { field }.into())
}

fn invalid_url(field: &'static str, e: &impl std::fmt::Display) -> ConfigurationError {
    ConfigurationError::InvalidUrl {
        field,
        reason: e.to_string(),
    }
}
