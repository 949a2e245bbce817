//! Roles and role derivation from identity-provider groups.
//!
//! Every user holds exactly one global role. The role is recomputed on each
//! login from the groups the provider reports, after configured overrides have
//! been folded into the group list.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Group name added for users listed in the admin override list.
pub const ADMIN_GROUP: &str = "admin";

/// Group name added for users listed in the manager override list.
pub const MANAGER_GROUP: &str = "manager";

/// Global role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Unrestricted access; supersedes every grant.
    Admin,
    /// Manages all teams.
    Manager,
    /// Access governed by grants and team membership.
    #[default]
    User,
}

impl Role {
    /// Returns true if this role has admin privileges.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Returns true if this is the global manager role.
    #[must_use]
    pub fn is_manager(&self) -> bool {
        matches!(self, Self::Manager)
    }

    /// Returns the lowercase storage name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::User => "user",
        }
    }

    /// Parses a storage name. Unknown names map to `User`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "admin" => Self::Admin,
            "manager" => Self::Manager,
            _ => Self::User,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strips a single leading `/` from a hierarchical group name.
///
/// Providers such as Keycloak report groups as paths (`/team1-managers`).
#[must_use]
pub fn normalize_group(group: &str) -> &str {
    group.strip_prefix('/').unwrap_or(group)
}

/// Configured mapping from identities and groups to roles.
///
/// The literal [`ADMIN_GROUP`] and [`MANAGER_GROUP`] names are built-in
/// markers and always apply, in addition to any configured groups. The
/// override lists depend on this: a listed user is granted the role by adding
/// the marker group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMapping {
    admin_users: Vec<String>,
    admin_groups: Vec<String>,
    manager_users: Vec<String>,
    manager_groups: Vec<String>,
}

impl RoleMapping {
    /// Creates an empty mapping: only the literal `admin`/`manager` markers apply.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user ids or emails that are always admins.
    #[must_use]
    pub fn with_admin_users(mut self, users: Vec<String>) -> Self {
        self.admin_users = users;
        self
    }

    /// Sets additional group names that grant the admin role.
    #[must_use]
    pub fn with_admin_groups(mut self, groups: Vec<String>) -> Self {
        self.admin_groups = groups;
        self
    }

    /// Sets the user ids or emails that are always managers.
    #[must_use]
    pub fn with_manager_users(mut self, users: Vec<String>) -> Self {
        self.manager_users = users;
        self
    }

    /// Sets additional group names that grant the manager role.
    #[must_use]
    pub fn with_manager_groups(mut self, groups: Vec<String>) -> Self {
        self.manager_groups = groups;
        self
    }

    /// Folds identity-based overrides into `groups`.
    ///
    /// A user listed by subject or email gains the `admin` / `manager` group
    /// unless it is already present.
    pub fn apply_overrides(&self, subject: &str, email: Option<&str>, groups: &mut Vec<String>) {
        let listed = |users: &[String]| {
            users
                .iter()
                .any(|u| u == subject || email.is_some_and(|e| e == u))
        };

        if listed(&self.admin_users) {
            push_unique(groups, ADMIN_GROUP);
        }
        if listed(&self.manager_users) {
            push_unique(groups, MANAGER_GROUP);
        }
    }

    /// Derives the global role from a group list.
    ///
    /// Admin markers win over manager markers; anything else is `User`.
    #[must_use]
    pub fn derive_role(&self, groups: &[String]) -> Role {
        let has_any = |marker: &str, configured: &[String]| {
            groups.iter().any(|g| {
                let g = normalize_group(g);
                g == marker || configured.iter().any(|c| normalize_group(c) == g)
            })
        };

        if has_any(ADMIN_GROUP, &self.admin_groups) {
            Role::Admin
        } else if has_any(MANAGER_GROUP, &self.manager_groups) {
            Role::Manager
        } else {
            Role::User
        }
    }
}

fn push_unique(groups: &mut Vec<String>, group: &str) {
    if !groups.iter().any(|g| g == group) {
        groups.push(group.to_string());
    }
}
