//! User domain type.
//!
//! A user is keyed by the provider's subject claim (`UserId`) and is also
//! uniquely addressable by email. Profile fields are refreshed from the latest
//! provider claims on every login; users are never hard-deleted here.

use crate::role::Role;
use chrono::{DateTime, Utc};
use fern_gate_core::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether an account may sign in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Normal account.
    #[default]
    Active,
    /// Deactivated by an administrator.
    Inactive,
    /// Temporarily blocked.
    Suspended,
}

impl AccountStatus {
    /// Returns the lowercase storage name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }

    /// Parses a storage name. Unknown names map to `Inactive`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "active" => Self::Active,
            "suspended" => Self::Suspended,
            _ => Self::Inactive,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    email: String,
    name: Option<String>,
    picture: Option<String>,
    email_verified: bool,
    role: Role,
    status: AccountStatus,
    groups: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl User {
    /// Creates a new active user with the `User` role.
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: email.into(),
            name: None,
            picture: None,
            email_verified: false,
            role: Role::User,
            status: AccountStatus::Active,
            groups: Vec::new(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    /// Creates a user with all fields specified.
    ///
    /// Use this when reconstituting a user from storage.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn with_all_fields(
        id: UserId,
        email: String,
        name: Option<String>,
        picture: Option<String>,
        email_verified: bool,
        role: Role,
        status: AccountStatus,
        groups: Vec<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        last_login_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            email,
            name,
            picture,
            email_verified,
            role,
            status,
            groups,
            created_at,
            updated_at,
            last_login_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> &UserId {
        &self.id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn picture(&self) -> Option<&str> {
        self.picture.as_deref()
    }

    #[must_use]
    pub fn email_verified(&self) -> bool {
        self.email_verified
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn status(&self) -> AccountStatus {
        self.status
    }

    /// Group memberships as reported by the provider (plus overrides).
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub fn last_login_at(&self) -> Option<DateTime<Utc>> {
        self.last_login_at
    }

    /// Returns true if the account may sign in.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Returns true if the user holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn set_email(&mut self, email: impl Into<String>) {
        self.email = email.into();
        self.touch();
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
        self.touch();
    }

    pub fn set_picture(&mut self, picture: Option<String>) {
        self.picture = picture;
        self.touch();
    }

    pub fn set_email_verified(&mut self, verified: bool) {
        self.email_verified = verified;
        self.touch();
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        self.touch();
    }

    pub fn set_status(&mut self, status: AccountStatus) {
        self.status = status;
        self.touch();
    }

    pub fn set_groups(&mut self, groups: Vec<String>) {
        self.groups = groups;
        self.touch();
    }

    /// Records a successful login at `at`.
    pub fn record_login(&mut self, at: DateTime<Utc>) {
        self.last_login_at = Some(at);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_is_active_plain_user() {
        let user = User::new(UserId::new("u1"), "new@example.com");
        assert_eq!(user.id().as_str(), "u1");
        assert_eq!(user.email(), "new@example.com");
        assert_eq!(user.role(), Role::User);
        assert!(user.is_active());
        assert!(user.groups().is_empty());
        assert!(user.last_login_at().is_none());
        assert_eq!(user.created_at(), user.updated_at());
    }

    #[test]
    fn setters_bump_updated_at() {
        let mut user = User::new(UserId::new("u1"), "a@example.com");
        let original = user.updated_at();
        std::thread::sleep(std::time::Duration::from_millis(2));

        user.set_groups(vec!["team1-users".to_string()]);

        assert_eq!(user.groups(), ["team1-users".to_string()]);
        assert!(user.updated_at() > original);
    }

    #[test]
    fn suspended_user_is_not_active() {
        let mut user = User::new(UserId::new("u1"), "a@example.com");
        user.set_status(AccountStatus::Suspended);
        assert!(!user.is_active());
    }

    #[test]
    fn account_status_names() {
        for status in [
            AccountStatus::Active,
            AccountStatus::Inactive,
            AccountStatus::Suspended,
        ] {
            assert_eq!(AccountStatus::from_name(status.as_str()), status);
        }
        assert_eq!(AccountStatus::from_name("bogus"), AccountStatus::Inactive);
    }

    #[test]
    fn user_serialization_roundtrip() {
        let mut user = User::new(UserId::new("u1"), "a@example.com");
        user.set_role(Role::Manager);
        user.set_name(Some("Alice".to_string()));

        let json = serde_json::to_string(&user).expect("serialize");
        let parsed: User = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(user, parsed);
    }
}
