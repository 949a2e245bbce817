//! In-memory store implementations.
//!
//! Used by tests and by single-process deployments that do not need sessions
//! to survive a restart.

use crate::error::StoreError;
use crate::permission::ProjectPermission;
use crate::scope::ScopeGrant;
use crate::session::{Session, SessionId};
use crate::store::{SessionStore, StoreResult, UserStore};
use crate::user::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fern_gate_core::UserId;
use std::collections::HashMap;
use tokio::sync::RwLock;

fn not_found(entity: &'static str, key: impl Into<String>) -> StoreError {
    StoreError::NotFound {
        entity,
        key: key.into(),
    }
}

/// In-memory `UserStore`.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
    scopes: RwLock<HashMap<UserId, Vec<ScopeGrant>>>,
    permissions: RwLock<HashMap<UserId, Vec<ProjectPermission>>>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, user: &User) -> StoreResult<()> {
        let mut users = self.users.write().await;
        if users.contains_key(user.id()) {
            return Err(StoreError::Conflict {
                entity: "user",
                key: user.id().to_string(),
            }
            .into());
        }
        if users.values().any(|u| u.email() == user.email()) {
            return Err(StoreError::Conflict {
                entity: "user",
                key: user.email().to_string(),
            }
            .into());
        }
        users.insert(user.id().clone(), user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.id() != user.id() && u.email() == user.email())
        {
            return Err(StoreError::Conflict {
                entity: "user",
                key: user.email().to_string(),
            }
            .into());
        }
        match users.get_mut(user.id()) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(not_found("user", user.id().as_str()).into()),
        }
    }

    async fn find_by_id(&self, id: &UserId) -> StoreResult<User> {
        self.users
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("user", id.as_str()).into())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email() == email)
            .cloned()
            .ok_or_else(|| not_found("user", email).into())
    }

    async fn set_groups(&self, id: &UserId, groups: &[String]) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| not_found("user", id.as_str()))?;
        user.set_groups(groups.to_vec());
        Ok(())
    }

    async fn grant_scope(&self, grant: &ScopeGrant) -> StoreResult<()> {
        self.scopes
            .write()
            .await
            .entry(grant.user_id.clone())
            .or_default()
            .push(grant.clone());
        Ok(())
    }

    async fn revoke_scope(&self, user_id: &UserId, scope: &str) -> StoreResult<u64> {
        let mut scopes = self.scopes.write().await;
        let Some(grants) = scopes.get_mut(user_id) else {
            return Ok(0);
        };
        let before = grants.len();
        grants.retain(|g| g.scope != scope);
        Ok((before - grants.len()) as u64)
    }

    async fn list_scopes(&self, user_id: &UserId) -> StoreResult<Vec<ScopeGrant>> {
        Ok(self
            .scopes
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn grant_project_permission(&self, permission: &ProjectPermission) -> StoreResult<()> {
        self.permissions
            .write()
            .await
            .entry(permission.user_id.clone())
            .or_default()
            .push(permission.clone());
        Ok(())
    }

    async fn list_project_permissions(
        &self,
        user_id: &UserId,
    ) -> StoreResult<Vec<ProjectPermission>> {
        Ok(self
            .permissions
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_last_login(&self, id: &UserId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| not_found("user", id.as_str()))?;
        user.record_login(at);
        Ok(())
    }
}

/// In-memory `SessionStore`.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions in any state.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session.id()) {
            return Err(StoreError::Conflict {
                entity: "session",
                key: session.id().redacted(),
            }
            .into());
        }
        sessions.insert(session.id().clone(), session.clone());
        Ok(())
    }

    async fn find(&self, id: &SessionId) -> StoreResult<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("session", id.redacted()).into())
    }

    async fn find_active(&self, id: &SessionId, now: DateTime<Utc>) -> StoreResult<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|s| s.is_valid_at(now))
            .cloned()
            .ok_or_else(|| not_found("session", id.redacted()).into())
    }

    async fn update_activity(&self, id: &SessionId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| not_found("session", id.redacted()))?;
        session.touch(at);
        Ok(())
    }

    async fn invalidate(&self, id: &SessionId) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| not_found("session", id.redacted()))?;
        session.invalidate();
        Ok(())
    }

    async fn invalidate_all(&self, user_id: &UserId) -> StoreResult<u64> {
        let mut sessions = self.sessions.write().await;
        let mut changed = 0;
        for session in sessions.values_mut() {
            if session.user_id() == user_id && session.is_active() {
                session.invalidate();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - sessions.len()) as u64)
    }

    async fn list_active_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let mut active: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id() == user_id && s.is_valid_at(now))
            .cloned()
            .collect();
        active.sort_by_key(Session::created_at);
        Ok(active)
    }
}
