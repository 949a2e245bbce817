//! HTTP error responses.
//!
//! Every failure leaves the server as a JSON body with a stable machine code
//! and a safe message. Store and provider details are logged, never echoed.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fern_gate_access::{AuthenticationError, AuthorizationError};
use fern_gate_provider::{FlowError, TokenValidationError};
use serde::Serialize;
use std::fmt;

/// Errors returned by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No credential was presented, or the session is unknown.
    NotAuthenticated,
    /// The session exists but has expired.
    SessionExpired,
    /// The bearer token was rejected.
    InvalidToken,
    /// The bearer token is valid but lacks the required scope.
    InsufficientScope { required: String },
    /// The caller is authenticated but not allowed to do this.
    Forbidden { reason: &'static str },
    /// The request itself is malformed.
    BadRequest { code: &'static str, message: String },
    /// OAuth login is not configured on this server.
    OAuthDisabled,
    /// A dependency failed; `details` is logged only.
    Unavailable { details: String },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotAuthenticated | Self::SessionExpired | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::InsufficientScope { .. } | Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::OAuthDisabled | Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::SessionExpired => "session_expired",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::Forbidden { .. } => "forbidden",
            Self::BadRequest { code, .. } => *code,
            Self::OAuthDisabled => "oauth_disabled",
            Self::Unavailable { .. } => "service_unavailable",
        }
    }

    /// True for failures that a fresh login would fix.
    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        self.status() == StatusCode::UNAUTHORIZED
    }

    /// Maps a failed callback to a 400 with a safe message.
    #[must_use]
    pub fn from_flow(error: &FlowError) -> Self {
        let message = match error {
            FlowError::StateMismatch => "OAuth state mismatch; please restart the login",
            FlowError::MissingCode => "authorization code missing from callback",
            FlowError::ProviderDenied { .. } => "the identity provider denied the login",
            FlowError::Provider { .. } => "authentication with the identity provider failed",
            FlowError::Identity { .. } => "could not resolve the user account",
            FlowError::Session { .. } => "could not create a session",
        };
        Self::BadRequest {
            code: error.code(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn from_token_validation(error: &TokenValidationError) -> Self {
        match error {
            TokenValidationError::InvalidToken => Self::InvalidToken,
            TokenValidationError::InsufficientScope { required } => Self::InsufficientScope {
                required: required.clone(),
            },
            TokenValidationError::Provider { details }
            | TokenValidationError::StoreUnavailable { details } => Self::Unavailable {
                details: details.clone(),
            },
        }
    }

    #[must_use]
    pub fn from_authentication(error: &AuthenticationError) -> Self {
        match error {
            AuthenticationError::SessionExpired { .. } => Self::SessionExpired,
            AuthenticationError::StoreUnavailable { details } => Self::Unavailable {
                details: details.clone(),
            },
            AuthenticationError::SessionNotFound { .. }
            | AuthenticationError::UserNotFound { .. }
            | AuthenticationError::InvalidUser { .. }
            | AuthenticationError::InvalidCredential { .. } => Self::NotAuthenticated,
        }
    }

    #[must_use]
    pub fn from_authorization(error: &AuthorizationError) -> Self {
        match error {
            AuthorizationError::NotAuthenticated => Self::NotAuthenticated,
            AuthorizationError::PermissionDenied { .. } => Self::Forbidden {
                reason: "permission denied",
            },
            AuthorizationError::InvalidScope { scope } => Self::BadRequest {
                code: "invalid_scope",
                message: format!("scope '{scope}' must be resource-type:action:resource-id"),
            },
            AuthorizationError::CheckFailed { reason } => Self::Unavailable {
                details: reason.clone(),
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Self::NotAuthenticated => "authentication required".to_string(),
            Self::SessionExpired => "session expired; please log in again".to_string(),
            Self::InvalidToken => "bearer token is invalid or expired".to_string(),
            Self::InsufficientScope { required } => {
                format!("bearer token lacks the required scope '{required}'")
            }
            Self::Forbidden { reason } => (*reason).to_string(),
            Self::BadRequest { message, .. } => message.clone(),
            Self::OAuthDisabled => "OAuth login is not enabled".to_string(),
            Self::Unavailable { .. } => "a required service is unavailable".to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Unavailable { details } = &self {
            tracing::error!(%details, "request failed on a dependency");
        }
        let message = self.message();
        let body = ErrorBody {
            error: self.code(),
            message: &message,
        };
        (self.status(), Json(body)).into_response()
    }
}
