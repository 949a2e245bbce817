//! The identity attached to an authenticated request.

use crate::session::Session;
use crate::user::User;
use serde::Serialize;

/// Subject reported for bearer callers that have no user profile.
pub const SERVICE_ACCOUNT_SUBJECT: &str = "service-account";

/// An authenticated caller: a user (via session or bearer token) or a
/// service account recognised by scope alone.
#[derive(Debug, Clone)]
pub struct AuthenticatedCaller {
    subject: String,
    user: Option<User>,
    session: Option<Session>,
    scopes: Vec<String>,
}

impl AuthenticatedCaller {
    /// A browser caller authenticated by session cookie.
    #[must_use]
    pub fn from_session(session: Session, user: User) -> Self {
        Self {
            subject: user.id().to_string(),
            user: Some(user),
            session: Some(session),
            scopes: Vec::new(),
        }
    }

    /// A bearer caller whose token resolved to a user profile.
    #[must_use]
    pub fn from_token(user: User, scopes: Vec<String>) -> Self {
        Self {
            subject: user.id().to_string(),
            user: Some(user),
            session: None,
            scopes,
        }
    }

    /// A bearer caller with the required scope but no user profile.
    #[must_use]
    pub fn service_account(scopes: Vec<String>) -> Self {
        Self {
            subject: SERVICE_ACCOUNT_SUBJECT.to_string(),
            user: None,
            session: None,
            scopes,
        }
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Token scopes for bearer callers; empty for session callers.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn is_service_account(&self) -> bool {
        self.user.is_none()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(User::is_admin)
    }

    /// Public view of the caller.
    #[must_use]
    pub fn summary(&self) -> CallerSummary {
        CallerSummary {
            subject: self.subject.clone(),
            email: self.user.as_ref().map(|u| u.email().to_string()),
            name: self.user.as_ref().and_then(|u| u.name().map(str::to_string)),
            role: self.user.as_ref().map(|u| u.role().to_string()),
            groups: self
                .user
                .as_ref()
                .map(|u| u.groups().to_vec())
                .unwrap_or_default(),
            is_service_account: self.is_service_account(),
        }
    }
}

/// Serializable description of a caller, without tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerSummary {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub groups: Vec<String>,
    pub is_service_account: bool,
}
