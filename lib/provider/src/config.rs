//! OAuth provider configuration.
//!
//! Loaded once at startup and shared read-only. Fields with defaults can be
//! omitted when loading from environment variables. List-valued settings are
//! comma-separated strings.

use crate::error::ConfigurationError;
use fern_gate_access::RoleMapping;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// Local login path; also the fallback logout destination.
pub const LOGIN_PATH: &str = "/auth/login";

/// Local callback path registered with the provider.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Logout path under a Keycloak-style issuer.
const ISSUER_LOGOUT_SUFFIX: &str = "/protocol/openid-connect/logout";

/// Names of the provider claims read for each user attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMapping {
    #[serde(default = "default_subject_claim")]
    pub subject: String,
    #[serde(default = "default_email_claim")]
    pub email: String,
    #[serde(default = "default_name_claim")]
    pub name: String,
    #[serde(default = "default_groups_claim")]
    pub groups: String,
    /// Role claim; its values are merged into the groups.
    #[serde(default = "default_roles_claim")]
    pub roles: String,
    #[serde(default = "default_picture_claim")]
    pub picture: String,
    #[serde(default = "default_email_verified_claim")]
    pub email_verified: String,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            subject: default_subject_claim(),
            email: default_email_claim(),
            name: default_name_claim(),
            groups: default_groups_claim(),
            roles: default_roles_claim(),
            picture: default_picture_claim(),
            email_verified: default_email_verified_claim(),
        }
    }
}

fn default_subject_claim() -> String {
    "sub".to_string()
}

fn default_email_claim() -> String {
    "email".to_string()
}

fn default_name_claim() -> String {
    "name".to_string()
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

fn default_roles_claim() -> String {
    "roles".to_string()
}

fn default_picture_claim() -> String {
    "picture".to_string()
}

fn default_email_verified_claim() -> String {
    "email_verified".to_string()
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

fn default_required_scope() -> String {
    "fern-read".to_string()
}

fn default_provider_timeout_seconds() -> u64 {
    10
}

/// Configuration for the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Whether OAuth login and bearer validation are enabled.
    #[serde(default)]
    enabled: bool,
    /// Issuer URL, used for discovery and the fallback logout URL.
    #[serde(default)]
    issuer_url: Option<String>,
    #[serde(default)]
    auth_url: Option<String>,
    #[serde(default)]
    token_url: Option<String>,
    #[serde(default)]
    userinfo_url: Option<String>,
    /// RFC 7662 introspection endpoint. When set, bearer tokens are confirmed here.
    #[serde(default)]
    introspection_url: Option<String>,
    /// Provider end-session endpoint.
    #[serde(default)]
    logout_url: Option<String>,
    #[serde(default)]
    client_id: String,
    /// Absent for public clients, which use PKCE instead.
    #[serde(default)]
    client_secret: Option<String>,
    /// Callback URL registered with the provider (e.g. "https://app.example.com/auth/callback").
    #[serde(default)]
    redirect_url: String,
    /// Scopes to request, comma-separated.
    #[serde(default = "default_scopes")]
    scopes: String,
    #[serde(default)]
    claims: ClaimMapping,
    /// Subjects or emails always granted admin, comma-separated.
    #[serde(default)]
    admin_users: String,
    #[serde(default)]
    admin_groups: String,
    #[serde(default)]
    manager_users: String,
    #[serde(default)]
    manager_groups: String,
    /// Scope a profile-less bearer token must carry.
    #[serde(default = "default_required_scope")]
    required_scope: String,
    #[serde(default = "default_provider_timeout_seconds")]
    provider_timeout_seconds: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer_url: None,
            auth_url: None,
            token_url: None,
            userinfo_url: None,
            introspection_url: None,
            logout_url: None,
            client_id: String::new(),
            client_secret: None,
            redirect_url: String::new(),
            scopes: default_scopes(),
            claims: ClaimMapping::default(),
            admin_users: String::new(),
            admin_groups: String::new(),
            manager_users: String::new(),
            manager_groups: String::new(),
            required_scope: default_required_scope(),
            provider_timeout_seconds: default_provider_timeout_seconds(),
        }
    }
}

/// Endpoints learned from provider discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredEndpoints {
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub userinfo_url: Option<String>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

impl OAuthConfig {
    /// Creates a builder for an enabled configuration.
    #[must_use]
    pub fn builder(client_id: impl Into<String>, redirect_url: impl Into<String>) -> OAuthConfigBuilder {
        OAuthConfigBuilder::new(client_id, redirect_url)
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn issuer_url(&self) -> Option<&str> {
        non_empty(self.issuer_url.as_ref())
    }

    #[must_use]
    pub fn auth_url(&self) -> Option<&str> {
        non_empty(self.auth_url.as_ref())
    }

    #[must_use]
    pub fn token_url(&self) -> Option<&str> {
        non_empty(self.token_url.as_ref())
    }

    #[must_use]
    pub fn userinfo_url(&self) -> Option<&str> {
        non_empty(self.userinfo_url.as_ref())
    }

    #[must_use]
    pub fn introspection_url(&self) -> Option<&str> {
        non_empty(self.introspection_url.as_ref())
    }

    #[must_use]
    pub fn logout_url(&self) -> Option<&str> {
        non_empty(self.logout_url.as_ref())
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        non_empty(self.client_secret.as_ref())
    }

    /// True when no client secret is configured; such clients must use PKCE.
    #[must_use]
    pub fn is_public_client(&self) -> bool {
        self.client_secret().is_none()
    }

    #[must_use]
    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    /// Scopes to request, parsed from the comma-separated setting.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        split_list(&self.scopes)
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimMapping {
        &self.claims
    }

    #[must_use]
    pub fn required_scope(&self) -> &str {
        &self.required_scope
    }

    #[must_use]
    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout_seconds)
    }

    /// Role overrides and role groups configured for this provider.
    #[must_use]
    pub fn role_mapping(&self) -> RoleMapping {
        RoleMapping::new()
            .with_admin_users(split_list(&self.admin_users))
            .with_admin_groups(split_list(&self.admin_groups))
            .with_manager_users(split_list(&self.manager_users))
            .with_manager_groups(split_list(&self.manager_groups))
    }

    /// True if any of the endpoints used by the flow still needs discovery.
    #[must_use]
    pub fn needs_discovery(&self) -> bool {
        self.auth_url().is_none() || self.token_url().is_none() || self.userinfo_url().is_none()
    }

    /// Fills endpoints that are not configured. Configured endpoints win.
    pub fn apply_discovery(&mut self, discovered: DiscoveredEndpoints) {
        if self.auth_url().is_none() {
            self.auth_url = discovered.auth_url;
        }
        if self.token_url().is_none() {
            self.token_url = discovered.token_url;
        }
        if self.userinfo_url().is_none() {
            self.userinfo_url = discovered.userinfo_url;
        }
    }

    /// Checks an enabled configuration for missing or malformed settings.
    ///
    /// A disabled configuration is always valid.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigurationError` found.
    pub fn validate(&self) -> Result<(), Report<ConfigurationError>> {
        if !self.enabled {
            return Ok(());
        }
        if self.client_id.is_empty() {
            return Err(ConfigurationError::Missing { field: "client_id" }.into());
        }
        check_url("redirect_url", Some(&self.redirect_url))?;
        check_url("auth_url", self.auth_url())?;
        check_url("token_url", self.token_url())?;
        check_url("userinfo_url", self.userinfo_url())?;
        for (field, value) in [
            ("issuer_url", self.issuer_url()),
            ("introspection_url", self.introspection_url()),
            ("logout_url", self.logout_url()),
        ] {
            if value.is_some() {
                check_url(field, value)?;
            }
        }
        if self.required_scope.is_empty() {
            return Err(ConfigurationError::Missing {
                field: "required_scope",
            }
            .into());
        }
        Ok(())
    }

    /// Where the browser goes after a local logout.
    ///
    /// - OAuth disabled or no ID token: the local login path
    /// - configured logout URL: that URL plus `id_token_hint` and
    ///   `post_logout_redirect_uri`
    /// - otherwise, with an issuer: the issuer's OpenID Connect logout endpoint
    /// - otherwise: the local login path
    #[must_use]
    pub fn provider_logout_url(&self, id_token: &str) -> String {
        if !self.enabled || id_token.is_empty() {
            return LOGIN_PATH.to_string();
        }

        let base = match (self.logout_url(), self.issuer_url()) {
            (Some(url), _) => url.to_string(),
            (None, Some(issuer)) => format!("{}{ISSUER_LOGOUT_SUFFIX}", issuer.trim_end_matches('/')),
            (None, None) => return LOGIN_PATH.to_string(),
        };

        let Ok(mut url) = Url::parse(&base) else {
            warn!("provider logout URL does not parse, using local login");
            return LOGIN_PATH.to_string();
        };
        url.query_pairs_mut()
            .append_pair("id_token_hint", id_token)
            .append_pair("post_logout_redirect_uri", &self.post_logout_redirect_url());
        url.to_string()
    }

    /// The redirect URL with the callback path replaced by the login path.
    #[must_use]
    pub fn post_logout_redirect_url(&self) -> String {
        self.redirect_url.replacen(CALLBACK_PATH, LOGIN_PATH, 1)
    }
}

fn check_url(field: &'static str, value: Option<&str>) -> Result<(), Report<ConfigurationError>> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Err(ConfigurationError::Missing { field }.into());
    };
    Url::parse(value).map_err(|e| ConfigurationError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Builder for `OAuthConfig`.
#[derive(Debug)]
pub struct OAuthConfigBuilder {
    config: OAuthConfig,
}

impl OAuthConfigBuilder {
    /// Creates a builder for an enabled configuration with required fields.
    #[must_use]
    pub fn new(client_id: impl Into<String>, redirect_url: impl Into<String>) -> Self {
        Self {
            config: OAuthConfig {
                enabled: true,
                client_id: client_id.into(),
                redirect_url: redirect_url.into(),
                ..OAuthConfig::default()
            },
        }
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    #[must_use]
    pub fn issuer_url(mut self, url: impl Into<String>) -> Self {
        self.config.issuer_url = Some(url.into());
        self
    }

    /// Sets the authorization, token, and userinfo endpoints.
    #[must_use]
    pub fn endpoints(
        mut self,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        userinfo_url: impl Into<String>,
    ) -> Self {
        self.config.auth_url = Some(auth_url.into());
        self.config.token_url = Some(token_url.into());
        self.config.userinfo_url = Some(userinfo_url.into());
        self
    }

    #[must_use]
    pub fn introspection_url(mut self, url: impl Into<String>) -> Self {
        self.config.introspection_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn logout_url(mut self, url: impl Into<String>) -> Self {
        self.config.logout_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = Some(secret.into());
        self
    }

    /// Sets the scopes to request.
    #[must_use]
    pub fn scopes(mut self, scopes: &[&str]) -> Self {
        self.config.scopes = scopes.join(",");
        self
    }

    #[must_use]
    pub fn claims(mut self, claims: ClaimMapping) -> Self {
        self.config.claims = claims;
        self
    }

    #[must_use]
    pub fn admin_users(mut self, users: &[&str]) -> Self {
        self.config.admin_users = users.join(",");
        self
    }

    #[must_use]
    pub fn admin_groups(mut self, groups: &[&str]) -> Self {
        self.config.admin_groups = groups.join(",");
        self
    }

    #[must_use]
    pub fn manager_users(mut self, users: &[&str]) -> Self {
        self.config.manager_users = users.join(",");
        self
    }

    #[must_use]
    pub fn manager_groups(mut self, groups: &[&str]) -> Self {
        self.config.manager_groups = groups.join(",");
        self
    }

    #[must_use]
    pub fn required_scope(mut self, scope: impl Into<String>) -> Self {
        self.config.required_scope = scope.into();
        self
    }

    #[must_use]
    pub fn provider_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.provider_timeout_seconds = seconds;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> OAuthConfig {
        self.config
    }
}
