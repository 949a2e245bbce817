//! The request gate: resolves each request's credential to an
//! [`AuthenticatedCaller`] before the handler runs.
//!
//! A bearer token takes precedence over the session cookie. A bad bearer
//! token is rejected outright; it never falls back to the cookie.

use super::{SESSION_COOKIE, found, wants_json};
use crate::{app::AppState, error::ApiError};
use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, Uri, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use fern_gate_access::{AuthenticatedCaller, SessionId};
use fern_gate_provider::LOGIN_PATH;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Extracts the token from an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
}

/// Reads the session id cookie.
pub fn session_id(headers: &HeaderMap) -> Option<SessionId> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .map(SessionId::new)
}

/// True for callers that expect JSON rather than a browser redirect.
pub fn is_api_request(uri: &Uri, headers: &HeaderMap) -> bool {
    uri.path().starts_with("/api/") || wants_json(headers)
}

/// Resolves the request credential to a caller.
///
/// # Errors
///
/// - `NotAuthenticated` / `SessionExpired` for a missing or dead session
/// - `InvalidToken` / `InsufficientScope` for a rejected bearer token
/// - `Unavailable` if a store or the provider could not be consulted
#[instrument(skip_all)]
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthenticatedCaller, ApiError> {
    if let Some(token) = bearer_token(headers) {
        let Some(chain) = &state.tokens else {
            debug!("bearer token presented while OAuth is disabled");
            return Err(ApiError::InvalidToken);
        };
        return chain
            .validate(token)
            .await
            .map_err(|e| ApiError::from_token_validation(e.current_context()));
    }

    let Some(id) = session_id(headers) else {
        return Err(ApiError::NotAuthenticated);
    };
    let (session, user) = state
        .lifecycle
        .validate(&id)
        .await
        .map_err(|e| ApiError::from_authentication(e.current_context()))?;

    Ok(AuthenticatedCaller::from_session(session, user))
}

/// Rejection produced by the gate and its extractors.
#[derive(Debug)]
pub struct AuthRejection {
    pub error: ApiError,
    /// Whether the caller gets JSON instead of a login redirect.
    pub api: bool,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        debug!(code = self.error.code(), api = self.api, "request rejected");
        if !self.api && self.error.is_unauthenticated() {
            return found(LOGIN_PATH);
        }
        self.error.into_response()
    }
}

/// Middleware that authenticates every request and attaches the caller as a
/// request extension.
pub async fn require_authentication(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let api = is_api_request(request.uri(), request.headers());
    match authenticate(&state, request.headers()).await {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(error) => AuthRejection { error, api }.into_response(),
    }
}

/// Extractor for requiring an authenticated caller.
///
/// Reuses the caller attached by [`require_authentication`] when present.
pub struct RequireAuth(pub AuthenticatedCaller);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(caller) = parts.extensions.get::<AuthenticatedCaller>() {
            return Ok(Self(caller.clone()));
        }

        let app_state = Arc::<AppState>::from_ref(state);
        let api = is_api_request(&parts.uri, &parts.headers);
        let caller = authenticate(&app_state, &parts.headers)
            .await
            .map_err(|error| AuthRejection { error, api })?;

        parts.extensions.insert(caller.clone());
        Ok(Self(caller))
    }
}

/// Extractor for requiring an authenticated admin user.
pub struct RequireAdmin(pub AuthenticatedCaller);

impl<S> FromRequestParts<S> for RequireAdmin
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequireAuth(caller) = RequireAuth::from_request_parts(parts, state).await?;

        if !caller.is_admin() {
            return Err(AuthRejection {
                error: ApiError::Forbidden {
                    reason: "admin access required",
                },
                api: true,
            });
        }

        Ok(Self(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).expect("header"));
        }
        map
    }

    #[test]
    fn bearer_token_requires_bearer_scheme() {
        let h = headers(&[(header::AUTHORIZATION, "Bearer abc.def")]);
        assert_eq!(bearer_token(&h), Some("abc.def"));

        let h = headers(&[(header::AUTHORIZATION, "bearer xyz")]);
        assert_eq!(bearer_token(&h), Some("xyz"));

        let h = headers(&[(header::AUTHORIZATION, "Basic Zm9vOmJhcg==")]);
        assert_eq!(bearer_token(&h), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn session_cookie_is_read() {
        let h = headers(&[(header::COOKIE, "theme=dark; session_id=s-123")]);
        assert_eq!(session_id(&h), Some(SessionId::new("s-123")));

        let h = headers(&[(header::COOKIE, "session_id=")]);
        assert_eq!(session_id(&h), None);
    }

    #[test]
    fn api_requests_are_detected() {
        let api: Uri = "/api/v1/teams/a/access".parse().expect("uri");
        let page: Uri = "/dashboard".parse().expect("uri");

        assert!(is_api_request(&api, &HeaderMap::new()));
        assert!(!is_api_request(&page, &HeaderMap::new()));
        assert!(is_api_request(
            &page,
            &headers(&[(header::ACCEPT, "application/json")])
        ));
        assert!(is_api_request(
            &page,
            &headers(&[(header::CONTENT_TYPE, "application/json; charset=utf-8")])
        ));
        assert!(!is_api_request(
            &page,
            &headers(&[(header::ACCEPT, "text/html")])
        ));
    }

    #[test]
    fn browser_rejections_redirect_to_login() {
        let response = AuthRejection {
            error: ApiError::NotAuthenticated,
            api: false,
        }
        .into_response();
        assert_eq!(response.status(), axum::http::StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], LOGIN_PATH);

        let response = AuthRejection {
            error: ApiError::NotAuthenticated,
            api: true,
        }
        .into_response();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);

        let response = AuthRejection {
            error: ApiError::Forbidden { reason: "nope" },
            api: false,
        }
        .into_response();
        assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
    }
}
