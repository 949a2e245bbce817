//! Explicit project permission records.
//!
//! Levels form a strict hierarchy: admin ⊇ delete ⊇ write ⊇ read.

use chrono::{DateTime, Utc};
use fern_gate_core::{PermissionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Permission level on a project. Ordering follows the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    Delete,
    Admin,
}

impl PermissionLevel {
    /// Returns true if holding `self` implies holding `required`.
    #[must_use]
    pub fn includes(self, required: Self) -> bool {
        self >= required
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unknown permission level name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLevel(pub String);

impl fmt::Display for UnknownLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown permission level: {}", self.0)
    }
}

impl std::error::Error for UnknownLevel {}

impl FromStr for PermissionLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "delete" => Ok(Self::Delete),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownLevel(other.to_string())),
        }
    }
}

/// A user's permission on one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPermission {
    pub id: PermissionId,
    pub user_id: UserId,
    pub project_id: String,
    pub level: PermissionLevel,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ProjectPermission {
    /// Creates a permission issued now.
    #[must_use]
    pub fn new(
        user_id: UserId,
        project_id: impl Into<String>,
        level: PermissionLevel,
        granted_by: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: PermissionId::new(),
            user_id,
            project_id: project_id.into(),
            level,
            granted_by,
            granted_at: Utc::now(),
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Returns true if this record grants at least `level` on `project_id` at `now`.
    #[must_use]
    pub fn grants(&self, project_id: &str, level: PermissionLevel, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && self.project_id == project_id && self.level.includes(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn hierarchy_is_strict() {
        use PermissionLevel::*;
        assert!(Admin.includes(Delete));
        assert!(Delete.includes(Write));
        assert!(Write.includes(Read));
        assert!(Read.includes(Read));
        assert!(!Read.includes(Write));
        assert!(!Write.includes(Delete));
        assert!(!Delete.includes(Admin));
    }

    #[test]
    fn level_parsing() {
        assert_eq!("delete".parse::<PermissionLevel>(), Ok(PermissionLevel::Delete));
        assert!("owner".parse::<PermissionLevel>().is_err());
    }

    #[test]
    fn expired_permission_grants_nothing() {
        let now = Utc::now();
        let perm = ProjectPermission::new(
            UserId::new("u1"),
            "P1",
            PermissionLevel::Admin,
            UserId::new("root"),
            Some(now - Duration::minutes(5)),
        );
        assert!(!perm.grants("P1", PermissionLevel::Read, now));
    }

    #[test]
    fn permission_is_project_scoped() {
        let now = Utc::now();
        let perm = ProjectPermission::new(
            UserId::new("u1"),
            "P1",
            PermissionLevel::Write,
            UserId::new("root"),
            None,
        );
        assert!(perm.grants("P1", PermissionLevel::Read, now));
        assert!(perm.grants("P1", PermissionLevel::Write, now));
        assert!(!perm.grants("P1", PermissionLevel::Delete, now));
        assert!(!perm.grants("P2", PermissionLevel::Read, now));
    }
}
