//! Authentication routes for login, callback, logout, and the current identity.

use super::{
    PKCE_COOKIE, REDIRECT_COOKIE, RequireAuth, SESSION_COOKIE, STATE_COOKIE, found, gate,
    safe_redirect, secure_cookies, wants_json,
};
use crate::{app::AppState, error::ApiError};
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use fern_gate_access::{ClientInfo, caller::CallerSummary};
use fern_gate_provider::{CALLBACK_PATH, CallbackParams, LogoutOutcome, StoredFlowState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::Duration as TimeDuration;
use tracing::{info, warn};

/// Lifetime of the OAuth flow cookies.
const FLOW_COOKIE_MINUTES: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    redirect: Option<String>,
}

/// Query parameters for the provider callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
    redirect: Option<String>,
}

#[derive(Debug, Serialize)]
struct LogoutResponse {
    message: &'static str,
    logout_url: String,
}

/// Short-lived cookie scoped to the callback path.
fn flow_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path(CALLBACK_PATH)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(FLOW_COOKIE_MINUTES))
        .build()
}

fn clear_flow_cookies(jar: CookieJar) -> CookieJar {
    [STATE_COOKIE, PKCE_COOKIE, REDIRECT_COOKIE]
        .into_iter()
        .fold(jar, |jar, name| {
            jar.remove(Cookie::build(name).path(CALLBACK_PATH))
        })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Client address and user agent, as reported by the proxy.
fn client_info(headers: &HeaderMap) -> ClientInfo {
    let ip = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .or_else(|| header_str(headers, "x-real-ip"))
        .unwrap_or_default()
        .trim();
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    ClientInfo::new(ip, user_agent)
}

/// Starts the login flow by redirecting to the identity provider.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Response), ApiError> {
    let flow = state.flow.as_ref().ok_or(ApiError::OAuthDisabled)?;
    let start = flow.start_login();
    let secure = secure_cookies(&state.session_config, &headers);

    let mut jar = jar.add(flow_cookie(STATE_COOKIE, start.state, secure));
    if let Some(verifier) = start.pkce_verifier {
        jar = jar.add(flow_cookie(PKCE_COOKIE, verifier, secure));
    }
    if let Some(target) = safe_redirect(query.redirect.as_deref()) {
        jar = jar.add(flow_cookie(REDIRECT_COOKIE, target.to_string(), secure));
    }

    Ok((jar, found(&start.authorization_url)))
}

/// Completes the login after the provider redirects back.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let Some(flow) = &state.flow else {
        return ApiError::OAuthDisabled.into_response();
    };

    let cookie_value = |name| jar.get(name).map(|c| c.value().to_string());
    let stored = StoredFlowState {
        state: cookie_value(STATE_COOKIE),
        pkce_verifier: cookie_value(PKCE_COOKIE),
    };
    let remembered = cookie_value(REDIRECT_COOKIE);
    let target = safe_redirect(query.redirect.as_deref())
        .or_else(|| safe_redirect(remembered.as_deref()))
        .unwrap_or("/")
        .to_string();

    let params = CallbackParams {
        state: query.state,
        code: query.code,
        error: query.error,
    };
    let jar = clear_flow_cookies(jar);

    match flow
        .complete_callback(params, stored, client_info(&headers))
        .await
    {
        Ok(outcome) => {
            let session_cookie =
                Cookie::build((SESSION_COOKIE, outcome.session.id().as_str().to_string()))
                    .path("/")
                    .http_only(true)
                    .secure(secure_cookies(&state.session_config, &headers))
                    .same_site(SameSite::Lax)
                    .max_age(TimeDuration::hours(
                        state.session_config.cookie_max_age_hours,
                    ));
            (jar.add(session_cookie), found(&target)).into_response()
        }
        Err(e) => {
            warn!(code = e.current_context().code(), error = %e.current_context(), "login callback failed");
            (jar, ApiError::from_flow(e.current_context())).into_response()
        }
    }
}

/// Ends the session and sends the browser to the provider logout page.
///
/// Mounted on POST only, so a cross-site link or image cannot end a session.
/// JSON callers get the logout URL in the body instead of a redirect.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let id = gate::session_id(&headers);

    let outcome = match &state.flow {
        Some(flow) => flow.logout(id.as_ref()).await,
        None => {
            if let Some(id) = &id {
                if let Err(e) = state.lifecycle.invalidate(id).await {
                    warn!(error = %e.current_context(), "failed to invalidate session on logout");
                }
            }
            LogoutOutcome {
                logout_url: state.oauth.provider_logout_url(""),
                user_id: None,
            }
        }
    };

    if let Some(user_id) = &outcome.user_id {
        info!(%user_id, "user logged out");
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    if wants_json(&headers) {
        let body = LogoutResponse {
            message: "logged out",
            logout_url: outcome.logout_url,
        };
        (jar, Json(body)).into_response()
    } else {
        (jar, found(&outcome.logout_url)).into_response()
    }
}

/// Returns the authenticated caller.
pub async fn me(RequireAuth(caller): RequireAuth) -> Json<CallerSummary> {
    Json(caller.summary())
}
