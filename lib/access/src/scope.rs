//! Scope grants and scope matching.
//!
//! A scope is a string `resource-type:action:resource-id`. The action and
//! resource id fields may independently be the wildcard `*`. Matching is total:
//! malformed scopes are inert and match nothing.

use crate::error::AuthorizationError;
use chrono::{DateTime, Utc};
use fern_gate_core::{GrantId, UserId};
use rootcause::Report;
use serde::{Deserialize, Serialize};

/// Wildcard accepted in the action and resource-id fields.
pub const WILDCARD: &str = "*";

/// Resource type used for project-level checks.
pub const PROJECT_RESOURCE: &str = "project";

/// A parsed scope string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope<'a> {
    pub resource_type: &'a str,
    pub action: &'a str,
    pub resource_id: &'a str,
}

impl<'a> Scope<'a> {
    /// Parses `type:action:id`. Returns `None` for any other shape,
    /// including empty fields.
    #[must_use]
    pub fn parse(raw: &'a str) -> Option<Self> {
        let mut fields = raw.split(':');
        let (Some(resource_type), Some(action), Some(resource_id), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return None;
        };
        if resource_type.is_empty() || action.is_empty() || resource_id.is_empty() {
            return None;
        }
        Some(Self {
            resource_type,
            action,
            resource_id,
        })
    }

    /// Returns true if this scope authorizes `action` on the given resource.
    #[must_use]
    pub fn permits(&self, resource_type: &str, resource_id: &str, action: &str) -> bool {
        self.resource_type == resource_type
            && (self.action == WILDCARD || self.action == action)
            && (self.resource_id == WILDCARD || self.resource_id == resource_id)
    }
}

/// Returns true if `granted` authorizes `action` on project `resource_id`.
#[must_use]
pub fn matches(granted: &str, resource_id: &str, action: &str) -> bool {
    matches_resource(granted, PROJECT_RESOURCE, resource_id, action)
}

/// Returns true if `granted` authorizes `action` on `resource_type/resource_id`.
#[must_use]
pub fn matches_resource(granted: &str, resource_type: &str, resource_id: &str, action: &str) -> bool {
    Scope::parse(granted).is_some_and(|s| s.permits(resource_type, resource_id, action))
}

/// Validates a scope string before it is granted.
///
/// # Errors
///
/// Returns `InvalidScope` if the string is not `type:action:id`.
pub fn validate_scope(raw: &str) -> Result<(), Report<AuthorizationError>> {
    match Scope::parse(raw) {
        Some(_) => Ok(()),
        None => Err(AuthorizationError::InvalidScope {
            scope: raw.to_string(),
        }
        .into()),
    }
}

/// A time-scoped permission grant held by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeGrant {
    pub id: GrantId,
    pub user_id: UserId,
    pub scope: String,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ScopeGrant {
    /// Creates a grant issued now.
    #[must_use]
    pub fn new(
        user_id: UserId,
        scope: impl Into<String>,
        granted_by: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: GrantId::new(),
            user_id,
            scope: scope.into(),
            granted_by,
            granted_at: Utc::now(),
            expires_at,
        }
    }

    /// Returns true once `now` has reached the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Returns true if this grant authorizes `action` on project `resource_id` at `now`.
    #[must_use]
    pub fn authorizes(&self, resource_id: &str, action: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && matches(&self.scope, resource_id, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn malformed_scopes_never_match() {
        let malformed = [
            "",
            "project",
            "project:read",
            "project:read:P1:extra",
            "project::P1",
            ":read:P1",
            "project:read:",
            "*",
            "::",
        ];
        for scope in malformed {
            for (action, id) in [("read", "P1"), ("*", "*"), ("", "")] {
                assert!(!matches(scope, id, action), "{scope:?} matched");
            }
        }
    }

    #[test]
    fn full_wildcard_matches_everything() {
        for action in ["read", "write", "delete", "admin"] {
            for id in ["P1", "P2", "anything"] {
                assert!(matches("project:*:*", id, action));
            }
        }
    }

    #[test]
    fn exact_scope_matches_only_itself() {
        assert!(matches("project:read:P1", "P1", "read"));
        assert!(!matches("project:read:P1", "P2", "read"));
        assert!(!matches("project:read:P1", "P1", "write"));
    }

    #[test]
    fn partial_wildcards_combine_per_field() {
        assert!(matches("project:*:P1", "P1", "delete"));
        assert!(!matches("project:*:P1", "P2", "delete"));
        assert!(matches("project:read:*", "P9", "read"));
        assert!(!matches("project:read:*", "P9", "write"));
    }

    #[test]
    fn other_resource_types_do_not_satisfy_project_checks() {
        assert!(!matches("team:*:*", "P1", "read"));
        assert!(matches_resource("team:manage:team1", "team", "team1", "manage"));
        assert!(!matches_resource("team:manage:team1", "team", "team2", "manage"));
    }

    #[test]
    fn validate_scope_rejects_bad_shape() {
        assert!(validate_scope("project:read:P1").is_ok());
        let err = validate_scope("project:read").unwrap_err();
        assert!(matches!(
            err.current_context(),
            AuthorizationError::InvalidScope { .. }
        ));
    }

    #[test]
    fn expired_grant_never_authorizes() {
        let now = Utc::now();
        let grant = ScopeGrant::new(
            UserId::new("u1"),
            "project:*:*",
            UserId::new("admin"),
            Some(now - Duration::seconds(1)),
        );
        assert!(grant.is_expired_at(now));
        assert!(!grant.authorizes("P1", "read", now));
    }

    #[test]
    fn unexpired_and_open_ended_grants_authorize() {
        let now = Utc::now();
        let timed = ScopeGrant::new(
            UserId::new("u1"),
            "project:read:P1",
            UserId::new("admin"),
            Some(now + Duration::hours(1)),
        );
        let forever = ScopeGrant::new(
            UserId::new("u1"),
            "project:read:P1",
            UserId::new("admin"),
            None,
        );
        assert!(timed.authorizes("P1", "read", now));
        assert!(forever.authorizes("P1", "read", now));
        assert!(!timed.authorizes("P1", "read", now + Duration::hours(1)));
    }
}
