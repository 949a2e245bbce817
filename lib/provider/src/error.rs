//! Error types for provider integration.
//!
//! Provider response bodies are never carried in these errors; only status
//! codes and transport-level descriptions are.

use std::fmt;

/// Invalid or incomplete OAuth configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required setting is empty.
    Missing { field: &'static str },
    /// A URL setting does not parse.
    InvalidUrl { field: &'static str, reason: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { field } => write!(f, "OAuth configuration is missing {field}"),
            Self::InvalidUrl { field, reason } => {
                write!(f, "OAuth configuration has an invalid {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Failures talking to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Provider metadata could not be discovered.
    Discovery { details: String },
    /// The authorization code could not be exchanged.
    ExchangeFailed { details: String },
    /// The userinfo endpoint failed or returned an unexpected status.
    UserinfoFailed { details: String },
    /// The introspection endpoint failed or returned an unexpected status.
    IntrospectionFailed { details: String },
    /// A provider payload could not be decoded.
    InvalidResponse { details: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery { details } => write!(f, "provider discovery failed: {details}"),
            Self::ExchangeFailed { details } => write!(f, "code exchange failed: {details}"),
            Self::UserinfoFailed { details } => write!(f, "userinfo request failed: {details}"),
            Self::IntrospectionFailed { details } => {
                write!(f, "token introspection failed: {details}")
            }
            Self::InvalidResponse { details } => {
                write!(f, "provider returned an invalid response: {details}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

/// Outcome of a rejected bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    /// The token is unknown, inactive, or malformed.
    InvalidToken,
    /// The token is active but lacks the required scope.
    InsufficientScope { required: String },
    /// The provider could not be consulted.
    Provider { details: String },
    /// The user store could not be consulted.
    StoreUnavailable { details: String },
}

impl TokenValidationError {
    /// Stable machine-readable code for API responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::Provider { .. } => "provider_unavailable",
            Self::StoreUnavailable { .. } => "store_unavailable",
        }
    }
}

impl fmt::Display for TokenValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidToken => write!(f, "token is invalid or inactive"),
            Self::InsufficientScope { required } => {
                write!(f, "token is missing required scope '{required}'")
            }
            Self::Provider { details } => write!(f, "token could not be validated: {details}"),
            Self::StoreUnavailable { details } => {
                write!(f, "token owner could not be resolved: {details}")
            }
        }
    }
}

impl std::error::Error for TokenValidationError {}

/// Failures of the login and callback flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The callback state is missing or does not match the stored value.
    StateMismatch,
    /// The callback carried no authorization code.
    MissingCode,
    /// The provider redirected back with an error instead of a code.
    ProviderDenied { error: String },
    /// Talking to the provider failed.
    Provider { details: String },
    /// The provider identity could not be mapped to a user.
    Identity { details: String },
    /// The session could not be created.
    Session { details: String },
}

impl FlowError {
    /// Stable machine-readable code for API responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::StateMismatch => "state_mismatch",
            Self::MissingCode => "missing_code",
            Self::ProviderDenied { .. } => "access_denied",
            Self::Provider { .. } => "provider_error",
            Self::Identity { .. } => "identity_error",
            Self::Session { .. } => "session_error",
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateMismatch => write!(f, "OAuth state is missing or does not match"),
            Self::MissingCode => write!(f, "authorization code is missing"),
            Self::ProviderDenied { error } => write!(f, "identity provider denied login: {error}"),
            Self::Provider { details } => write!(f, "identity provider error: {details}"),
            Self::Identity { details } => write!(f, "could not resolve identity: {details}"),
            Self::Session { details } => write!(f, "could not create session: {details}"),
        }
    }
}

impl std::error::Error for FlowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_scope_is_distinct_from_invalid() {
        let insufficient = TokenValidationError::InsufficientScope {
            required: "fern-read".to_string(),
        };
        assert_ne!(insufficient.code(), TokenValidationError::InvalidToken.code());
        assert!(insufficient.to_string().contains("fern-read"));
    }

    #[test]
    fn flow_codes_are_stable() {
        assert_eq!(FlowError::StateMismatch.code(), "state_mismatch");
        assert_eq!(FlowError::MissingCode.code(), "missing_code");
    }
}
