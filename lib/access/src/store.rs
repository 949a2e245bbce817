//! Persistence contracts for users, grants, and sessions.
//!
//! The engine never talks to a database directly; it goes through these
//! traits so it can be tested against the in-memory implementations in
//! [`crate::memory`] while production uses Postgres.

use crate::error::StoreError;
use crate::permission::ProjectPermission;
use crate::scope::ScopeGrant;
use crate::session::{Session, SessionId};
use crate::user::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_gate_core::UserId;

/// Result type for store operations.
pub type StoreResult<T> = fern_gate_core::Result<T, StoreError>;

/// Storage for users and the grants attached to them.
///
/// Lookups that find nothing return `StoreError::NotFound`.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a new user.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the id or email is already taken.
    async fn create(&self, user: &User) -> StoreResult<()>;

    /// Replaces an existing user record.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the new email belongs to another user.
    async fn update(&self, user: &User) -> StoreResult<()>;

    /// Looks a user up by provider subject.
    async fn find_by_id(&self, id: &UserId) -> StoreResult<User>;

    /// Looks a user up by email.
    async fn find_by_email(&self, email: &str) -> StoreResult<User>;

    /// Looks a user up by id, falling back to email.
    async fn find_by_id_or_email(&self, key: &str) -> StoreResult<User> {
        match self.find_by_id(&UserId::new(key)).await {
            Ok(user) => Ok(user),
            Err(e) if e.current_context().is_not_found() => self.find_by_email(key).await,
            Err(e) => Err(e),
        }
    }

    /// Replaces a user's group memberships.
    async fn set_groups(&self, id: &UserId, groups: &[String]) -> StoreResult<()>;

    /// Stores a scope grant.
    async fn grant_scope(&self, grant: &ScopeGrant) -> StoreResult<()>;

    /// Removes every grant of `scope` held by the user. Returns the number removed.
    async fn revoke_scope(&self, user_id: &UserId, scope: &str) -> StoreResult<u64>;

    /// Lists all grants for a user, expired ones included.
    async fn list_scopes(&self, user_id: &UserId) -> StoreResult<Vec<ScopeGrant>>;

    /// Stores a project permission.
    async fn grant_project_permission(&self, permission: &ProjectPermission) -> StoreResult<()>;

    /// Lists all project permissions for a user, expired ones included.
    async fn list_project_permissions(&self, user_id: &UserId)
    -> StoreResult<Vec<ProjectPermission>>;

    /// Records the time of the user's latest login.
    async fn update_last_login(&self, id: &UserId, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Storage for server-side sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new session.
    async fn create(&self, session: &Session) -> StoreResult<()>;

    /// Fetches a session in any state.
    async fn find(&self, id: &SessionId) -> StoreResult<Session>;

    /// Fetches a session only if it is active and unexpired at `now`.
    async fn find_active(&self, id: &SessionId, now: DateTime<Utc>) -> StoreResult<Session>;

    /// Sets `last_activity`. Expiry is untouched.
    async fn update_activity(&self, id: &SessionId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Marks one session inactive.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    async fn invalidate(&self, id: &SessionId) -> StoreResult<()>;

    /// Marks every session of a user inactive. Returns the number changed.
    async fn invalidate_all(&self, user_id: &UserId) -> StoreResult<u64>;

    /// Deletes sessions whose expiry is at or before `now`. Returns the number deleted.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Lists a user's sessions that are active and unexpired at `now`.
    async fn list_active_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>>;
}
