//! Authorization decisions.
//!
//! A denial is a value (`Ok(false)` or `false`), never an error. Only checks
//! that must consult the grant store are fallible, and then only because the
//! store could not be read.

use crate::caller::AuthenticatedCaller;
use crate::error::AuthorizationError;
use crate::permission::{PermissionLevel, ProjectPermission};
use crate::role::normalize_group;
use crate::scope::{ScopeGrant, validate_scope};
use crate::store::UserStore;
use crate::user::User;
use chrono::{DateTime, Utc};
use fern_gate_core::UserId;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Group suffix granting access to a team's projects.
pub const TEAM_USERS_SUFFIX: &str = "-users";

/// Group suffix granting management of a team.
pub const TEAM_MANAGERS_SUFFIX: &str = "-managers";

/// Action a service account may perform on projects.
pub const SERVICE_ACCOUNT_ACTION: &str = "read";

type AuthzResult<T> = fern_gate_core::Result<T, AuthorizationError>;

/// Evaluates roles, team groups, and grants.
#[derive(Clone)]
pub struct AuthorizationEngine {
    users: Arc<dyn UserStore>,
}

impl AuthorizationEngine {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Returns true if `user` may perform `action` on project `resource_id`.
    ///
    /// Admins are allowed without consulting the grant store.
    ///
    /// # Errors
    ///
    /// Returns `CheckFailed` if grants could not be loaded.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub async fn can_access_resource(
        &self,
        user: &User,
        resource_id: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        if user.is_admin() {
            return Ok(true);
        }

        let now = Utc::now();
        let grants = self.load_grants(user.id()).await?;
        let allowed = grants.iter().any(|g| g.authorizes(resource_id, action, now));
        debug!(allowed, grants = grants.len(), "evaluated scope grants");
        Ok(allowed)
    }

    /// Like [`Self::can_access_resource`], for any authenticated caller.
    ///
    /// Service accounts hold the platform read scope and may only read.
    ///
    /// # Errors
    ///
    /// Returns `CheckFailed` if grants could not be loaded.
    pub async fn caller_can_access_resource(
        &self,
        caller: &AuthenticatedCaller,
        resource_id: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        match caller.user() {
            Some(user) => self.can_access_resource(user, resource_id, action).await,
            None => Ok(action == SERVICE_ACCOUNT_ACTION),
        }
    }

    /// Returns true if `user` holds at least `level` on `project_id`.
    ///
    /// # Errors
    ///
    /// Returns `CheckFailed` if permissions could not be loaded.
    #[instrument(skip(self, user), fields(user_id = %user.id()))]
    pub async fn has_project_permission(
        &self,
        user: &User,
        project_id: &str,
        level: PermissionLevel,
    ) -> AuthzResult<bool> {
        if user.is_admin() {
            return Ok(true);
        }

        let now = Utc::now();
        let permissions = self
            .users
            .list_project_permissions(user.id())
            .await
            .map_err(|e| AuthorizationError::CheckFailed {
                reason: e.current_context().to_string(),
            })?;
        Ok(permissions.iter().any(|p| p.grants(project_id, level, now)))
    }

    /// Returns true if `user` may manage `team`.
    #[must_use]
    pub fn can_manage_team(&self, user: &User, team: &str) -> bool {
        if user.is_admin() || user.role().is_manager() {
            return true;
        }
        let managers = format!("{team}{TEAM_MANAGERS_SUFFIX}");
        has_group(user, &managers)
    }

    /// Returns true if `user` may see `team`'s projects.
    #[must_use]
    pub fn can_access_team_projects(&self, user: &User, team: &str) -> bool {
        if user.is_admin() || user.role().is_manager() {
            return true;
        }
        let members = format!("{team}{TEAM_USERS_SUFFIX}");
        let managers = format!("{team}{TEAM_MANAGERS_SUFFIX}");
        has_group(user, &members) || has_group(user, &managers)
    }

    /// Teams the user belongs to, in group order. Not deduplicated.
    #[must_use]
    pub fn user_teams(&self, user: &User) -> Vec<String> {
        user.groups()
            .iter()
            .map(|g| normalize_group(g))
            .filter_map(|g| {
                g.strip_suffix(TEAM_USERS_SUFFIX)
                    .or_else(|| g.strip_suffix(TEAM_MANAGERS_SUFFIX))
            })
            .filter(|team| !team.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Teams the user manages through a `-managers` group. Not deduplicated.
    #[must_use]
    pub fn managed_teams(&self, user: &User) -> Vec<String> {
        user.groups()
            .iter()
            .filter_map(|g| normalize_group(g).strip_suffix(TEAM_MANAGERS_SUFFIX))
            .filter(|team| !team.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Grants a scope to a user after checking its shape.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` for malformed scopes, `CheckFailed` if the store fails.
    #[instrument(skip(self))]
    pub async fn grant_scope(
        &self,
        user_id: &UserId,
        scope: &str,
        granted_by: &UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> AuthzResult<ScopeGrant> {
        validate_scope(scope)?;
        let grant = ScopeGrant::new(user_id.clone(), scope, granted_by.clone(), expires_at);
        self.users
            .grant_scope(&grant)
            .await
            .map_err(|e| AuthorizationError::CheckFailed {
                reason: e.current_context().to_string(),
            })?;
        Ok(grant)
    }

    /// Revokes every grant of `scope`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `CheckFailed` if the store fails.
    #[instrument(skip(self))]
    pub async fn revoke_scope(&self, user_id: &UserId, scope: &str) -> AuthzResult<u64> {
        self.users
            .revoke_scope(user_id, scope)
            .await
            .map_err(|e| {
                AuthorizationError::CheckFailed {
                    reason: e.current_context().to_string(),
                }
                .into()
            })
    }

    /// Lists a user's unexpired grants.
    ///
    /// # Errors
    ///
    /// Returns `CheckFailed` if the store fails.
    pub async fn list_active_scopes(&self, user_id: &UserId) -> AuthzResult<Vec<ScopeGrant>> {
        let now = Utc::now();
        let mut grants = self.load_grants(user_id).await?;
        grants.retain(|g| !g.is_expired_at(now));
        Ok(grants)
    }

    /// Records an explicit project permission.
    ///
    /// # Errors
    ///
    /// Returns `CheckFailed` if the store fails.
    pub async fn grant_project_permission(
        &self,
        permission: &ProjectPermission,
    ) -> AuthzResult<()> {
        self.users
            .grant_project_permission(permission)
            .await
            .map_err(|e| {
                AuthorizationError::CheckFailed {
                    reason: e.current_context().to_string(),
                }
                .into()
            })
    }

    async fn load_grants(&self, user_id: &UserId) -> AuthzResult<Vec<ScopeGrant>> {
        self.users.list_scopes(user_id).await.map_err(|e| {
            AuthorizationError::CheckFailed {
                reason: e.current_context().to_string(),
            }
            .into()
        })
    }
}

fn has_group(user: &User, wanted: &str) -> bool {
    user.groups().iter().any(|g| normalize_group(g) == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::InMemoryUserStore;
    use crate::role::Role;
    use crate::store::StoreResult;
    use async_trait::async_trait;
    use chrono::Duration;

    /// A user store whose every call fails.
    struct UnavailableUserStore;

    fn down<T>() -> StoreResult<T> {
        Err(StoreError::Unavailable {
            details: "connection refused".to_string(),
        }
        .into())
    }

    #[async_trait]
    impl UserStore for UnavailableUserStore {
        async fn create(&self, _: &User) -> StoreResult<()> {
            down()
        }
        async fn update(&self, _: &User) -> StoreResult<()> {
            down()
        }
        async fn find_by_id(&self, _: &UserId) -> StoreResult<User> {
            down()
        }
        async fn find_by_email(&self, _: &str) -> StoreResult<User> {
            down()
        }
        async fn set_groups(&self, _: &UserId, _: &[String]) -> StoreResult<()> {
            down()
        }
        async fn grant_scope(&self, _: &ScopeGrant) -> StoreResult<()> {
            down()
        }
        async fn revoke_scope(&self, _: &UserId, _: &str) -> StoreResult<u64> {
            down()
        }
        async fn list_scopes(&self, _: &UserId) -> StoreResult<Vec<ScopeGrant>> {
            down()
        }
        async fn grant_project_permission(&self, _: &ProjectPermission) -> StoreResult<()> {
            down()
        }
        async fn list_project_permissions(
            &self,
            _: &UserId,
        ) -> StoreResult<Vec<ProjectPermission>> {
            down()
        }
        async fn update_last_login(&self, _: &UserId, _: DateTime<Utc>) -> StoreResult<()> {
            down()
        }
    }

    fn user_with(role: Role, groups: &[&str]) -> User {
        let mut user = User::new(UserId::new("u1"), "u1@example.com");
        user.set_role(role);
        user.set_groups(groups.iter().map(|g| (*g).to_string()).collect());
        user
    }

    fn engine() -> (AuthorizationEngine, Arc<InMemoryUserStore>) {
        let store = Arc::new(InMemoryUserStore::new());
        (AuthorizationEngine::new(store.clone()), store)
    }

    #[tokio::test]
    async fn admin_short_circuits_before_store() {
        let engine = AuthorizationEngine::new(Arc::new(UnavailableUserStore));
        let admin = user_with(Role::Admin, &[]);

        let allowed = engine
            .can_access_resource(&admin, "P1", "delete")
            .await
            .expect("admin check never reads the store");
        assert!(allowed);
    }

    #[tokio::test]
    async fn store_failure_is_not_a_denial() {
        let engine = AuthorizationEngine::new(Arc::new(UnavailableUserStore));
        let user = user_with(Role::User, &[]);

        let err = engine
            .can_access_resource(&user, "P1", "read")
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            AuthorizationError::CheckFailed { .. }
        ));
    }

    #[tokio::test]
    async fn no_grant_is_denial() {
        let (engine, _) = engine();
        let user = user_with(Role::User, &[]);
        assert!(
            !engine
                .can_access_resource(&user, "P1", "read")
                .await
                .expect("check")
        );
    }

    #[tokio::test]
    async fn granted_scope_authorizes_only_its_target() {
        let (engine, _) = engine();
        let user = user_with(Role::User, &[]);
        engine
            .grant_scope(user.id(), "project:read:P1", &UserId::new("root"), None)
            .await
            .expect("grant");

        assert!(
            engine
                .can_access_resource(&user, "P1", "read")
                .await
                .expect("check")
        );
        assert!(
            !engine
                .can_access_resource(&user, "P1", "write")
                .await
                .expect("check")
        );
        assert!(
            !engine
                .can_access_resource(&user, "P2", "read")
                .await
                .expect("check")
        );
    }

    #[tokio::test]
    async fn expired_grant_is_ignored() {
        let (engine, store) = engine();
        let user = user_with(Role::User, &[]);
        let grant = ScopeGrant::new(
            user.id().clone(),
            "project:*:*",
            UserId::new("root"),
            Some(Utc::now() - Duration::minutes(1)),
        );
        store.grant_scope(&grant).await.expect("grant");

        assert!(
            !engine
                .can_access_resource(&user, "P1", "read")
                .await
                .expect("check")
        );
        assert!(
            engine
                .list_active_scopes(user.id())
                .await
                .expect("list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn scope_can_be_granted_before_first_login() {
        let (engine, store) = engine();
        let newcomer = UserId::new("not-yet-seen");

        let grant = engine
            .grant_scope(&newcomer, "project:read:P1", &UserId::new("root"), None)
            .await
            .expect("grant");

        assert!(store.is_empty().await);
        assert_eq!(grant.user_id, newcomer);
        let listed = engine.list_active_scopes(&newcomer).await.expect("list");
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn malformed_scope_cannot_be_granted() {
        let (engine, store) = engine();
        let err = engine
            .grant_scope(&UserId::new("u1"), "project:read", &UserId::new("root"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            AuthorizationError::InvalidScope { .. }
        ));
        assert!(
            store
                .list_scopes(&UserId::new("u1"))
                .await
                .expect("list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn revoke_removes_access() {
        let (engine, _) = engine();
        let user = user_with(Role::User, &[]);
        engine
            .grant_scope(user.id(), "project:*:P1", &UserId::new("root"), None)
            .await
            .expect("grant");

        let removed = engine
            .revoke_scope(user.id(), "project:*:P1")
            .await
            .expect("revoke");

        assert_eq!(removed, 1);
        assert!(
            !engine
                .can_access_resource(&user, "P1", "read")
                .await
                .expect("check")
        );
    }

    #[tokio::test]
    async fn service_accounts_may_only_read() {
        let (engine, _) = engine();
        let caller = AuthenticatedCaller::service_account(vec!["fern-read".to_string()]);
        assert!(
            engine
                .caller_can_access_resource(&caller, "P1", "read")
                .await
                .expect("check")
        );
        assert!(
            !engine
                .caller_can_access_resource(&caller, "P1", "write")
                .await
                .expect("check")
        );
    }

    #[tokio::test]
    async fn project_permission_hierarchy() {
        let (engine, _) = engine();
        let user = user_with(Role::User, &[]);
        engine
            .grant_project_permission(&ProjectPermission::new(
                user.id().clone(),
                "P1",
                PermissionLevel::Delete,
                UserId::new("root"),
                None,
            ))
            .await
            .expect("grant");

        for (level, expected) in [
            (PermissionLevel::Read, true),
            (PermissionLevel::Write, true),
            (PermissionLevel::Delete, true),
            (PermissionLevel::Admin, false),
        ] {
            let got = engine
                .has_project_permission(&user, "P1", level)
                .await
                .expect("check");
            assert_eq!(got, expected, "{level}");
        }
    }

    #[test]
    fn team_management_rules() {
        let (engine, _) = engine();

        assert!(engine.can_manage_team(&user_with(Role::Admin, &[]), "team1"));
        assert!(engine.can_manage_team(&user_with(Role::Manager, &[]), "team1"));
        assert!(engine.can_manage_team(&user_with(Role::User, &["/team1-managers"]), "team1"));
        assert!(engine.can_manage_team(&user_with(Role::User, &["team1-managers"]), "team1"));
        assert!(!engine.can_manage_team(&user_with(Role::User, &["team1-users"]), "team1"));
        assert!(!engine.can_manage_team(&user_with(Role::User, &["Team1-managers"]), "team1"));
    }

    #[test]
    fn team_project_access_from_membership() {
        let (engine, _) = engine();
        let member = user_with(Role::User, &["team1-users"]);

        assert!(engine.can_access_team_projects(&member, "team1"));
        assert!(!engine.can_access_team_projects(&member, "team2"));

        let manager = user_with(Role::User, &["/team2-managers"]);
        assert!(engine.can_access_team_projects(&manager, "team2"));
    }

    #[test]
    fn team_lists_are_not_deduplicated() {
        let (engine, _) = engine();
        let user = user_with(
            Role::User,
            &["team1-users", "/team1-managers", "team2-managers", "other"],
        );

        assert_eq!(engine.user_teams(&user), ["team1", "team1", "team2"]);
        assert_eq!(engine.managed_teams(&user), ["team1", "team2"]);
    }
}
