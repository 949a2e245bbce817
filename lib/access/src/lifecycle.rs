//! Session lifecycle: creation, validation, and invalidation.
//!
//! ```text
//!   create ──> Active ──(now >= expires_at)──> Expired
//!                │
//!                └──(invalidate / invalidate_all)──> Inactive
//! ```
//!
//! Expired and inactive sessions are both unusable. Rows stay in the store
//! until `cleanup_expired` removes expired ones.

use crate::error::{AuthenticationError, StoreError};
use crate::session::{ClientInfo, Session, SessionId, TokenSet};
use crate::store::{SessionStore, UserStore};
use crate::user::User;
use chrono::Utc;
use fern_gate_core::UserId;
use rootcause::Report;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

type AuthResult<T> = fern_gate_core::Result<T, AuthenticationError>;

fn unavailable(e: &Report<StoreError>) -> AuthenticationError {
    AuthenticationError::StoreUnavailable {
        details: e.current_context().to_string(),
    }
}

/// Drives sessions through their lifecycle.
#[derive(Clone)]
pub struct SessionLifecycle {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
}

impl SessionLifecycle {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>, users: Arc<dyn UserStore>) -> Self {
        Self { sessions, users }
    }

    /// Creates and stores a new active session for `user`.
    ///
    /// The expiry is `now + expires_in`, or 24 hours when the provider did
    /// not report a lifetime.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the session could not be written.
    #[instrument(skip(self, user, tokens, client), fields(user_id = %user.id()))]
    pub async fn create(
        &self,
        user: &User,
        tokens: TokenSet,
        client: ClientInfo,
    ) -> AuthResult<Session> {
        let session = Session::establish(SessionId::generate(), user, tokens, client, Utc::now());
        self.sessions
            .create(&session)
            .await
            .map_err(|e| unavailable(&e))?;

        info!(
            session = %session.id().redacted(),
            expires_at = %session.expires_at(),
            "session created"
        );
        Ok(session)
    }

    /// Resolves a session id to a live session and its owner.
    ///
    /// Activity is refreshed on success; a failure to record it is logged
    /// and does not fail validation.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if the id is unknown, inactive, or expired in the store
    /// - `SessionExpired` if the record passed the store filter but is no longer valid
    /// - `UserNotFound` if the owner record is gone
    /// - `InvalidUser` if the owner may not sign in
    #[instrument(skip(self, id), fields(session = %id.redacted()))]
    pub async fn validate(&self, id: &SessionId) -> AuthResult<(Session, User)> {
        let now = Utc::now();
        let mut session = match self.sessions.find_active(id, now).await {
            Ok(session) => session,
            Err(e) if e.current_context().is_not_found() => {
                debug!("no active session");
                return Err(AuthenticationError::SessionNotFound {
                    session: id.redacted(),
                }
                .into());
            }
            Err(e) => return Err(unavailable(&e).into()),
        };

        if !session.is_valid_at(now) {
            return Err(AuthenticationError::SessionExpired {
                session: id.redacted(),
            }
            .into());
        }

        let user = match self.users.find_by_id(session.user_id()).await {
            Ok(user) => user,
            Err(e) if e.current_context().is_not_found() => {
                return Err(AuthenticationError::UserNotFound {
                    user_id: session.user_id().clone(),
                }
                .into());
            }
            Err(e) => return Err(unavailable(&e).into()),
        };

        if !user.is_active() {
            warn!(user_id = %user.id(), status = %user.status(), "session owner is not active");
            return Err(AuthenticationError::InvalidUser {
                user_id: user.id().clone(),
                status: user.status(),
            }
            .into());
        }

        if let Err(e) = self.sessions.update_activity(id, now).await {
            warn!(error = %e.current_context(), "failed to record session activity");
        } else {
            session.touch(now);
        }

        Ok((session, user))
    }

    /// Fetches a session in any state, without validating it.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the id is unknown, `StoreUnavailable` if the store fails.
    pub async fn find(&self, id: &SessionId) -> AuthResult<Session> {
        match self.sessions.find(id).await {
            Ok(session) => Ok(session),
            Err(e) if e.current_context().is_not_found() => {
                Err(AuthenticationError::SessionNotFound {
                    session: id.redacted(),
                }
                .into())
            }
            Err(e) => Err(unavailable(&e).into()),
        }
    }

    /// Marks a session inactive. Unknown sessions are treated as already logged out.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store fails.
    #[instrument(skip(self, id), fields(session = %id.redacted()))]
    pub async fn invalidate(&self, id: &SessionId) -> AuthResult<()> {
        match self.sessions.invalidate(id).await {
            Ok(()) => {
                info!("session invalidated");
                Ok(())
            }
            Err(e) if e.current_context().is_not_found() => {
                debug!("session already gone");
                Ok(())
            }
            Err(e) => Err(unavailable(&e).into()),
        }
    }

    /// Marks every session of a user inactive. Returns the number changed.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store fails.
    #[instrument(skip(self))]
    pub async fn invalidate_all(&self, user_id: &UserId) -> AuthResult<u64> {
        let changed = self
            .sessions
            .invalidate_all(user_id)
            .await
            .map_err(|e| unavailable(&e))?;
        info!(changed, "all sessions invalidated");
        Ok(changed)
    }

    /// Deletes expired sessions. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store fails.
    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        self.sessions
            .cleanup_expired(Utc::now())
            .await
            .map_err(|e| unavailable(&e).into())
    }

    /// Lists a user's live sessions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store fails.
    pub async fn active_sessions(&self, user_id: &UserId) -> AuthResult<Vec<Session>> {
        self.sessions
            .list_active_for_user(user_id, Utc::now())
            .await
            .map_err(|e| unavailable(&e).into())
    }
}
