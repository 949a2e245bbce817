//! OAuth2 Authorization Code flow coordination.
//!
//! The coordinator is transport-agnostic: the HTTP layer stores the values in
//! [`LoginStart`] (in short-lived cookies) and hands them back as
//! [`StoredFlowState`] on the callback.

use crate::claims::ProviderClaims;
use crate::client::{ProviderClient, UserinfoOutcome};
use crate::error::FlowError;
use fern_gate_access::{ClientInfo, IdentityResolver, Session, SessionId, SessionLifecycle, User};
use fern_gate_core::{UserId, generate_state};
use oauth2::PkceCodeChallenge;
use rootcause::Report;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Everything needed to redirect the browser to the provider.
#[derive(Debug, Clone)]
pub struct LoginStart {
    pub authorization_url: String,
    /// Must come back unchanged on the callback.
    pub state: String,
    /// Present for public clients only.
    pub pkce_verifier: Option<String>,
}

/// Query parameters of the provider callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    /// Set when the provider redirected back with an error.
    pub error: Option<String>,
}

/// Flow values the server stored at login start.
#[derive(Debug, Clone, Default)]
pub struct StoredFlowState {
    pub state: Option<String>,
    pub pkce_verifier: Option<String>,
}

/// Result of a successful callback.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: Session,
    pub is_new_user: bool,
}

/// Result of a logout.
#[derive(Debug, Clone)]
pub struct LogoutOutcome {
    /// Where to send the browser next.
    pub logout_url: String,
    /// Owner of the ended session, when it could be resolved.
    pub user_id: Option<UserId>,
}

/// Short, non-secret prefix of a flow value for logs.
fn fingerprint(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => format!("{}...", v.chars().take(6).collect::<String>()),
        Some(_) => "<empty>".to_string(),
        None => "<none>".to_string(),
    }
}

/// Drives login, callback, and logout against one provider.
#[derive(Clone)]
pub struct OAuthFlowCoordinator {
    client: Arc<ProviderClient>,
    resolver: IdentityResolver,
    lifecycle: SessionLifecycle,
}

impl OAuthFlowCoordinator {
    #[must_use]
    pub fn new(
        client: Arc<ProviderClient>,
        resolver: IdentityResolver,
        lifecycle: SessionLifecycle,
    ) -> Self {
        Self {
            client,
            resolver,
            lifecycle,
        }
    }

    /// Starts a login: fresh state and, for public clients, a PKCE pair.
    #[must_use]
    pub fn start_login(&self) -> LoginStart {
        let state = generate_state();
        let (challenge, verifier) = if self.client.config().is_public_client() {
            let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
            (Some(challenge), Some(verifier.secret().clone()))
        } else {
            (None, None)
        };

        let authorization_url = self.client.authorization_url(state.clone(), challenge);
        debug!(pkce = verifier.is_some(), "login started");

        LoginStart {
            authorization_url,
            state,
            pkce_verifier: verifier,
        }
    }

    /// Completes the callback: checks state, exchanges the code, resolves the
    /// user, and opens a session.
    ///
    /// # Errors
    ///
    /// - `StateMismatch` if either state value is missing or they differ
    /// - `ProviderDenied` if the provider returned an error
    /// - `MissingCode` if no code was returned
    /// - `Provider`, `Identity`, or `Session` if a later step fails
    #[instrument(skip_all)]
    pub async fn complete_callback(
        &self,
        params: CallbackParams,
        stored: StoredFlowState,
        client: ClientInfo,
    ) -> Result<LoginOutcome, Report<FlowError>> {
        let state_ok = matches!(
            (params.state.as_deref(), stored.state.as_deref()),
            (Some(received), Some(expected)) if !expected.is_empty() && received == expected
        );
        if !state_ok {
            warn!(
                received = %fingerprint(params.state.as_deref()),
                expected = %fingerprint(stored.state.as_deref()),
                "OAuth state mismatch"
            );
            return Err(FlowError::StateMismatch.into());
        }

        if let Some(error) = params.error {
            warn!(%error, "provider returned an error to the callback");
            return Err(FlowError::ProviderDenied { error }.into());
        }

        let Some(code) = params.code.filter(|c| !c.is_empty()) else {
            return Err(FlowError::MissingCode.into());
        };

        let tokens = self
            .client
            .exchange_code(&code, stored.pkce_verifier.as_deref())
            .await
            .map_err(|e| FlowError::Provider {
                details: e.current_context().to_string(),
            })?;

        let profile = match self.client.userinfo(&tokens.access_token).await {
            Ok(UserinfoOutcome::Profile(body)) => body,
            Ok(_) => {
                return Err(FlowError::Provider {
                    details: "userinfo rejected the new access token".to_string(),
                }
                .into());
            }
            Err(e) => {
                return Err(FlowError::Provider {
                    details: e.current_context().to_string(),
                }
                .into());
            }
        };

        let claims = ProviderClaims::from_json(&profile, self.client.config().claims())
            .map_err(|e| FlowError::Identity {
                details: e.current_context().to_string(),
            })?;
        let resolved = self
            .resolver
            .find_or_create(&claims.into_identity())
            .await
            .map_err(|e| FlowError::Identity {
                details: e.current_context().to_string(),
            })?;

        if !resolved.user.is_active() {
            return Err(FlowError::Identity {
                details: format!("account is {}", resolved.user.status()),
            }
            .into());
        }

        let session = self
            .lifecycle
            .create(&resolved.user, tokens, client)
            .await
            .map_err(|e| FlowError::Session {
                details: e.current_context().to_string(),
            })?;

        info!(
            user_id = %resolved.user.id(),
            is_new_user = resolved.is_new_user,
            "login completed"
        );

        Ok(LoginOutcome {
            user: resolved.user,
            session,
            is_new_user: resolved.is_new_user,
        })
    }

    /// Ends a session and computes the provider logout URL.
    ///
    /// Never fails: an unknown session or a store error still yields a logout URL.
    #[instrument(skip_all)]
    pub async fn logout(&self, session_id: Option<&SessionId>) -> LogoutOutcome {
        let Some(id) = session_id else {
            return LogoutOutcome {
                logout_url: self.build_provider_logout_url(""),
                user_id: None,
            };
        };

        let session = match self.lifecycle.find(id).await {
            Ok(session) => Some(session),
            Err(e) => {
                debug!(error = %e.current_context(), "logout for unknown session");
                None
            }
        };

        if let Err(e) = self.lifecycle.invalidate(id).await {
            warn!(error = %e.current_context(), "failed to invalidate session on logout");
        }

        let id_token = session
            .as_ref()
            .and_then(Session::id_token)
            .unwrap_or_default();
        LogoutOutcome {
            logout_url: self.build_provider_logout_url(id_token),
            user_id: session.map(|s| s.user_id().clone()),
        }
    }

    /// Provider logout URL for `id_token`; the local login path when there is none.
    #[must_use]
    pub fn build_provider_logout_url(&self, id_token: &str) -> String {
        self.client.config().provider_logout_url(id_token)
    }
}
