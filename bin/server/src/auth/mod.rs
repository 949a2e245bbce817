//! Authentication for the HTTP layer.
//!
//! - [`routes`]: login, callback, logout, and the current-identity endpoint
//! - [`gate`]: the request gate middleware and its extractors
//! - [`db`]: Postgres user and session stores
//!
//! Browser logins carry a `session_id` cookie. API callers may instead send
//! an `Authorization: Bearer` token, validated against the identity provider.

pub mod db;
pub mod gate;
pub mod routes;

pub use gate::{AuthRejection, RequireAdmin, RequireAuth};

use crate::config::SessionConfig;
use axum::{
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Session cookie name.
pub const SESSION_COOKIE: &str = "session_id";

/// OAuth `state` cookie, set at login and checked on the callback.
pub const STATE_COOKIE: &str = "oauth_state";

/// PKCE verifier cookie, public clients only.
pub const PKCE_COOKIE: &str = "pkce_verifier";

/// Post-login destination requested at login.
pub const REDIRECT_COOKIE: &str = "oauth_redirect";

/// A `302 Found` redirect.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Whether cookies for this request get the Secure flag.
pub fn secure_cookies(config: &SessionConfig, headers: &HeaderMap) -> bool {
    config.secure_cookies
        || headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Returns `target` if it is a same-site relative path.
pub fn safe_redirect(target: Option<&str>) -> Option<&str> {
    target.filter(|t| t.starts_with('/') && !t.starts_with("//") && !t.contains('\\'))
}

/// True when the caller negotiates JSON: a JSON `Accept` or `Content-Type`,
/// or an XHR marker.
pub fn wants_json(headers: &HeaderMap) -> bool {
    let header_value = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
    let json = |name| header_value(name).is_some_and(|v| v.contains("application/json"));

    json(header::ACCEPT)
        || json(header::CONTENT_TYPE)
        || headers
            .get("x-requested-with")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn only_relative_redirects_are_followed() {
        assert_eq!(safe_redirect(Some("/projects/1")), Some("/projects/1"));
        assert_eq!(safe_redirect(Some("//evil.example.com")), None);
        assert_eq!(safe_redirect(Some("https://evil.example.com")), None);
        assert_eq!(safe_redirect(Some("/\\evil.example.com")), None);
        assert_eq!(safe_redirect(None), None);
    }

    #[test]
    fn json_is_negotiated_by_accept_content_type_or_xhr() {
        let with = |name: &'static str, value: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert(name, HeaderValue::from_static(value));
            headers
        };

        assert!(wants_json(&with("accept", "application/json")));
        assert!(wants_json(&with("content-type", "application/json; charset=utf-8")));
        assert!(wants_json(&with("x-requested-with", "XMLHttpRequest")));
        assert!(!wants_json(&with("accept", "text/html")));
        assert!(!wants_json(&HeaderMap::new()));
    }

    #[test]
    fn secure_flag_follows_forwarded_proto() {
        let config = SessionConfig::default();
        let mut headers = HeaderMap::new();
        assert!(!secure_cookies(&config, &headers));

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert!(secure_cookies(&config, &headers));

        let forced = SessionConfig {
            secure_cookies: true,
            ..SessionConfig::default()
        };
        assert!(secure_cookies(&forced, &HeaderMap::new()));
    }
}
