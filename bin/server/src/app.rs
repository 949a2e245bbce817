//! Application state and router assembly.

use crate::{api, auth, config::SessionConfig};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use fern_gate_access::{
    AuthorizationEngine, IdentityResolver, SessionLifecycle, SessionStore, UserStore,
};
use fern_gate_provider::{OAuthConfig, OAuthFlowCoordinator, ProviderClient, TokenValidationChain};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Shared application state.
pub struct AppState {
    pub lifecycle: SessionLifecycle,
    pub authz: AuthorizationEngine,
    pub oauth: Arc<OAuthConfig>,
    /// `None` when OAuth is disabled.
    pub flow: Option<OAuthFlowCoordinator>,
    /// `None` when OAuth is disabled; bearer tokens are then rejected.
    pub tokens: Option<TokenValidationChain>,
    pub session_config: SessionConfig,
}

impl AppState {
    /// Wires the engine components over the given stores.
    ///
    /// `provider` must be present iff OAuth is enabled.
    pub fn new(
        oauth: Arc<OAuthConfig>,
        provider: Option<Arc<ProviderClient>>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        session_config: SessionConfig,
    ) -> Self {
        let lifecycle = SessionLifecycle::new(sessions, users.clone());
        let resolver = IdentityResolver::new(users.clone(), Arc::new(oauth.role_mapping()));

        let (flow, tokens) = match provider {
            Some(client) => (
                Some(OAuthFlowCoordinator::new(
                    client.clone(),
                    resolver.clone(),
                    lifecycle.clone(),
                )),
                Some(TokenValidationChain::new(client, resolver)),
            ),
            None => (None, None),
        };

        Self {
            lifecycle,
            authz: AuthorizationEngine::new(users),
            oauth,
            flow,
            tokens,
            session_config,
        }
    }
}

/// Builds the HTTP router.
///
/// Everything under `/api/` sits behind the request gate.
pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route(
            "/api/v1/projects/{project_id}/access",
            get(api::project_access),
        )
        .route("/api/v1/teams/{team}/access", get(api::team_access))
        .route(
            "/api/v1/users/{user_id}/scopes",
            get(api::list_scopes)
                .post(api::grant_scope)
                .delete(api::revoke_scope),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::gate::require_authentication,
        ));

    Router::new()
        .route("/auth/login", get(auth::routes::login))
        .route("/auth/callback", get(auth::routes::callback))
        .route("/auth/logout", post(auth::routes::logout))
        .route("/auth/me", get(auth::routes::me))
        .route("/health", get(|| async { "ok" }))
        .merge(protected)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
