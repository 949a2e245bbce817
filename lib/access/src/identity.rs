//! Resolution of provider identities to local users.
//!
//! On every successful login the provider's claims are folded into the user
//! record: profile fields are refreshed and the role is recomputed from the
//! reported groups plus configured overrides.

use crate::error::AuthenticationError;
use crate::role::{Role, RoleMapping};
use crate::store::UserStore;
use crate::user::User;
use chrono::Utc;
use fern_gate_core::UserId;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Identity claims reported by the provider for one login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Stable subject identifier.
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub email_verified: bool,
    /// Group memberships (roles already merged in).
    pub groups: Vec<String>,
}

impl IdentityClaims {
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }
}

/// Outcome of [`IdentityResolver::find_or_create`].
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub user: User,
    /// True when the user record was created by this login.
    pub is_new_user: bool,
}

/// Finds or creates users from provider claims.
#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserStore>,
    roles: Arc<RoleMapping>,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, roles: Arc<RoleMapping>) -> Self {
        Self { users, roles }
    }

    /// Looks the user up by subject, then by email; creates it if neither matches.
    ///
    /// Existing users keep their id and status. An email already held by a
    /// different user is not moved; the existing address is kept. Last-login
    /// is recorded on a best-effort basis.
    ///
    /// # Errors
    ///
    /// - `InvalidCredential` if the claims carry no subject or no email
    /// - `StoreUnavailable` if a lookup or write fails
    #[instrument(skip(self, claims), fields(subject = %claims.subject))]
    pub async fn find_or_create(
        &self,
        claims: &IdentityClaims,
    ) -> Result<ResolvedIdentity, Report<AuthenticationError>> {
        let email = required_email(claims)?;
        let (groups, role) = self.mapped_groups(claims, email);

        let (mut user, is_new_user) = match self.lookup(&claims.subject, email).await? {
            Some(mut user) => {
                if user.email() != email {
                    if self.email_taken(user.id(), email).await? {
                        warn!(
                            user_id = %user.id(),
                            "provider email belongs to another user, keeping stored email"
                        );
                    } else {
                        user.set_email(email);
                    }
                }
                user.set_name(claims.name.clone());
                user.set_picture(claims.picture.clone());
                user.set_email_verified(claims.email_verified);
                user.set_groups(groups);
                user.set_role(role);
                self.users.update(&user).await.map_err(store_failed)?;
                (user, false)
            }
            None => (self.create_user(claims, email, groups, role).await?, true),
        };

        let now = Utc::now();
        match self.users.update_last_login(user.id(), now).await {
            Ok(()) => user.record_login(now),
            Err(e) => warn!(error = %e.current_context(), "failed to record last login"),
        }

        Ok(ResolvedIdentity { user, is_new_user })
    }

    /// Resolves the owner of a bearer token.
    ///
    /// An existing user is returned as stored, with no writes. A user seen
    /// for the first time is created the same way a first login would.
    ///
    /// # Errors
    ///
    /// - `InvalidCredential` if the claims carry no subject or no email
    /// - `StoreUnavailable` if a lookup or the creation fails
    #[instrument(skip(self, claims), fields(subject = %claims.subject))]
    pub async fn find_or_register(
        &self,
        claims: &IdentityClaims,
    ) -> Result<ResolvedIdentity, Report<AuthenticationError>> {
        let email = required_email(claims)?;
        if let Some(user) = self.lookup(&claims.subject, email).await? {
            return Ok(ResolvedIdentity {
                user,
                is_new_user: false,
            });
        }

        let (groups, role) = self.mapped_groups(claims, email);
        let user = self.create_user(claims, email, groups, role).await?;
        Ok(ResolvedIdentity {
            user,
            is_new_user: true,
        })
    }

    fn mapped_groups(&self, claims: &IdentityClaims, email: &str) -> (Vec<String>, Role) {
        let mut groups = claims.groups.clone();
        self.roles
            .apply_overrides(&claims.subject, Some(email), &mut groups);
        let role = self.roles.derive_role(&groups);
        (groups, role)
    }

    async fn create_user(
        &self,
        claims: &IdentityClaims,
        email: &str,
        groups: Vec<String>,
        role: Role,
    ) -> Result<User, Report<AuthenticationError>> {
        let mut user = User::new(UserId::new(claims.subject.as_str()), email);
        user.set_name(claims.name.clone());
        user.set_picture(claims.picture.clone());
        user.set_email_verified(claims.email_verified);
        user.set_groups(groups);
        user.set_role(role);
        self.users.create(&user).await.map_err(store_failed)?;
        info!(user_id = %user.id(), role = %role, "created user on first login");
        Ok(user)
    }

    async fn lookup(
        &self,
        subject: &str,
        email: &str,
    ) -> Result<Option<User>, Report<AuthenticationError>> {
        match self.users.find_by_id(&UserId::new(subject)).await {
            Ok(user) => return Ok(Some(user)),
            Err(e) if e.current_context().is_not_found() => {}
            Err(e) => return Err(store_failed(e)),
        }
        match self.users.find_by_email(email).await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.current_context().is_not_found() => Ok(None),
            Err(e) => Err(store_failed(e)),
        }
    }

    async fn email_taken(
        &self,
        owner: &UserId,
        email: &str,
    ) -> Result<bool, Report<AuthenticationError>> {
        match self.users.find_by_email(email).await {
            Ok(other) => Ok(other.id() != owner),
            Err(e) if e.current_context().is_not_found() => Ok(false),
            Err(e) => Err(store_failed(e)),
        }
    }
}

fn required_email(claims: &IdentityClaims) -> Result<&str, Report<AuthenticationError>> {
    if claims.subject.is_empty() {
        return Err(AuthenticationError::InvalidCredential {
            reason: "identity has no subject".to_string(),
        }
        .into());
    }
    claims
        .email
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            AuthenticationError::InvalidCredential {
                reason: "identity has no email".to_string(),
            }
            .into()
        })
}

fn store_failed(e: Report<crate::error::StoreError>) -> Report<AuthenticationError> {
    AuthenticationError::StoreUnavailable {
        details: e.current_context().to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryUserStore;

    fn resolver(mapping: RoleMapping) -> (IdentityResolver, Arc<InMemoryUserStore>) {
        let store = Arc::new(InMemoryUserStore::new());
        (
            IdentityResolver::new(store.clone(), Arc::new(mapping)),
            store,
        )
    }

    #[tokio::test]
    async fn first_login_creates_plain_user() {
        let (resolver, store) = resolver(RoleMapping::new());
        let claims = IdentityClaims::new("u1")
            .with_email("new@example.com")
            .with_name("New User");

        let resolved = resolver.find_or_create(&claims).await.expect("resolve");

        assert!(resolved.is_new_user);
        assert_eq!(resolved.user.id().as_str(), "u1");
        assert_eq!(resolved.user.role(), Role::User);
        assert!(resolved.user.is_active());
        assert!(resolved.user.last_login_at().is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn returning_user_is_refreshed() {
        let (resolver, store) = resolver(RoleMapping::new());
        resolver
            .find_or_create(&IdentityClaims::new("u1").with_email("old@example.com"))
            .await
            .expect("first");

        let claims = IdentityClaims::new("u1")
            .with_email("new@example.com")
            .with_name("Renamed")
            .with_groups(vec!["/admin".to_string(), "team1-users".to_string()]);
        let resolved = resolver.find_or_create(&claims).await.expect("second");

        assert!(!resolved.is_new_user);
        assert_eq!(resolved.user.email(), "new@example.com");
        assert_eq!(resolved.user.name(), Some("Renamed"));
        assert_eq!(resolved.user.role(), Role::Admin);
        let stored = store.find_by_id(&UserId::new("u1")).await.expect("stored");
        assert_eq!(stored.groups().len(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn email_match_links_to_existing_user() {
        let (resolver, store) = resolver(RoleMapping::new());
        store
            .create(&User::new(UserId::new("legacy-id"), "a@example.com"))
            .await
            .expect("seed");

        let resolved = resolver
            .find_or_create(&IdentityClaims::new("new-subject").with_email("a@example.com"))
            .await
            .expect("resolve");

        assert!(!resolved.is_new_user);
        assert_eq!(resolved.user.id().as_str(), "legacy-id");
    }

    #[tokio::test]
    async fn email_owned_by_another_user_is_not_moved() {
        let (resolver, store) = resolver(RoleMapping::new());
        resolver
            .find_or_create(&IdentityClaims::new("u1").with_email("a@example.com"))
            .await
            .expect("u1");
        resolver
            .find_or_create(&IdentityClaims::new("u2").with_email("b@example.com"))
            .await
            .expect("u2");

        let resolved = resolver
            .find_or_create(
                &IdentityClaims::new("u1")
                    .with_email("b@example.com")
                    .with_name("Still U1"),
            )
            .await
            .expect("third login");

        assert_eq!(resolved.user.id().as_str(), "u1");
        assert_eq!(resolved.user.email(), "a@example.com");
        assert_eq!(resolved.user.name(), Some("Still U1"));
        let u1 = store.find_by_id(&UserId::new("u1")).await.expect("u1");
        let u2 = store.find_by_id(&UserId::new("u2")).await.expect("u2");
        assert_eq!(u1.email(), "a@example.com");
        assert_eq!(u2.email(), "b@example.com");
    }

    #[tokio::test]
    async fn bearer_lookup_does_not_rewrite_existing_user() {
        let (resolver, store) = resolver(RoleMapping::new());
        let mut seeded = User::new(UserId::new("u1"), "u1@example.com");
        seeded.set_groups(vec!["team1-users".to_string()]);
        store.create(&seeded).await.expect("seed");

        let claims = IdentityClaims::new("u1")
            .with_email("u1@example.com")
            .with_groups(vec!["admin".to_string()]);
        let resolved = resolver.find_or_register(&claims).await.expect("resolve");

        assert!(!resolved.is_new_user);
        assert_eq!(resolved.user.role(), Role::User);
        let stored = store.find_by_id(&UserId::new("u1")).await.expect("stored");
        assert_eq!(stored.groups(), ["team1-users".to_string()]);
        assert!(stored.last_login_at().is_none());
    }

    #[tokio::test]
    async fn bearer_lookup_registers_unknown_user() {
        let (resolver, store) = resolver(RoleMapping::new());
        let claims = IdentityClaims::new("u5")
            .with_email("u5@example.com")
            .with_groups(vec!["/admin".to_string()]);

        let resolved = resolver.find_or_register(&claims).await.expect("resolve");

        assert!(resolved.is_new_user);
        assert_eq!(resolved.user.role(), Role::Admin);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn overrides_apply_before_role_derivation() {
        let mapping = RoleMapping::new().with_manager_users(vec!["boss@example.com".to_string()]);
        let (resolver, _) = resolver(mapping);

        let resolved = resolver
            .find_or_create(&IdentityClaims::new("u9").with_email("boss@example.com"))
            .await
            .expect("resolve");

        assert_eq!(resolved.user.role(), Role::Manager);
        assert_eq!(resolved.user.groups(), ["manager".to_string()]);
    }

    #[tokio::test]
    async fn missing_email_is_rejected() {
        let (resolver, store) = resolver(RoleMapping::new());
        let err = resolver
            .find_or_create(&IdentityClaims::new("u1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            AuthenticationError::InvalidCredential { .. }
        ));
        assert!(store.is_empty().await);
    }
}
