//! Error types for the access crate.
//!
//! Errors are returned wrapped in `rootcause::Report`:
//! - `AuthenticationError`: session and identity resolution failures
//! - `AuthorizationError`: failures to reach an authorization decision
//! - `StoreError`: failures reported by the persistence collaborators
//!
//! An authorization *denial* is never an error. Engine checks return
//! `Ok(false)`; `AuthorizationError::PermissionDenied` exists only for the HTTP
//! layer to render a 403.

use crate::user::AccountStatus;
use fern_gate_core::UserId;
use std::fmt;

/// Errors from authentication and session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// No usable session exists for the presented id.
    SessionNotFound { session: String },
    /// The session exists but is past its expiry or was invalidated.
    SessionExpired { session: String },
    /// The owning user record does not exist.
    UserNotFound { user_id: UserId },
    /// The owning user exists but is not allowed to sign in.
    InvalidUser {
        user_id: UserId,
        status: AccountStatus,
    },
    /// The credential is missing or malformed.
    InvalidCredential { reason: String },
    /// A store call failed, so the outcome could not be determined.
    StoreUnavailable { details: String },
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound { session } => write!(f, "session not found: {session}"),
            Self::SessionExpired { session } => write!(f, "session has expired: {session}"),
            Self::UserNotFound { user_id } => write!(f, "user not found: {user_id}"),
            Self::InvalidUser { user_id, status } => {
                write!(f, "user {user_id} is not active (status: {status})")
            }
            Self::InvalidCredential { reason } => write!(f, "invalid credential: {reason}"),
            Self::StoreUnavailable { details } => {
                write!(f, "identity store unavailable: {details}")
            }
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors from authorization operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// No authenticated caller.
    NotAuthenticated,
    /// Caller lacks the required permission.
    PermissionDenied {
        subject: String,
        action: String,
        resource: String,
    },
    /// The decision could not be made because the grant store failed.
    CheckFailed { reason: String },
    /// A scope string does not have the `type:action:id` shape.
    InvalidScope { scope: String },
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "user is not authenticated"),
            Self::PermissionDenied {
                subject,
                action,
                resource,
            } => write!(f, "{subject} lacks permission to {action} on {resource}"),
            Self::CheckFailed { reason } => write!(f, "authorization check failed: {reason}"),
            Self::InvalidScope { scope } => {
                write!(f, "invalid scope '{scope}': expected type:action:id")
            }
        }
    }
}

impl std::error::Error for AuthorizationError {}

/// Errors reported by `UserStore` and `SessionStore` implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested record does not exist.
    NotFound { entity: &'static str, key: String },
    /// A record with the same key already exists.
    Conflict { entity: &'static str, key: String },
    /// The backing store failed.
    Unavailable { details: String },
}

impl StoreError {
    /// Returns true for the not-found variant.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::Conflict { entity, key } => write!(f, "{entity} already exists: {key}"),
            Self::Unavailable { details } => write!(f, "store unavailable: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}
