//! Strongly-typed identifiers.
//!
//! Records owned by this service (scope grants, project permissions) use ULID
//! identifiers so they sort by creation time. Identities that come from the
//! identity provider (`UserId`) are opaque strings: the provider's subject claim
//! is the stable key and is never reinterpreted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Generates a ULID-backed identifier with a display prefix.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let prefix_with_underscore = concat!($prefix, "_");
                let ulid_str = s.strip_prefix(prefix_with_underscore).unwrap_or(s);

                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Unique identifier for a scope grant.
    GrantId,
    "grant"
);

define_id!(
    /// Unique identifier for a project permission record.
    PermissionId,
    "perm"
);

/// Stable identifier of a user, taken from the provider's subject claim.
///
/// Empty values are representable; rejecting them is a caller concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user ID from a subject claim.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_id_display_format() {
        let id = GrantId::new();
        assert!(id.to_string().starts_with("grant_"));
    }

    #[test]
    fn parse_with_prefix() {
        let id = PermissionId::new();
        let parsed: PermissionId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_without_prefix() {
        let ulid = Ulid::new();
        let id: GrantId = ulid.to_string().parse().expect("should parse");
        assert_eq!(id.to_string(), format!("grant_{ulid}"));
    }

    #[test]
    fn parse_invalid_ulid() {
        let err = "grant_nope".parse::<GrantId>().unwrap_err();
        assert_eq!(err.id_type, "GrantId");
    }

    #[test]
    fn user_id_is_transparent_string() {
        let id = UserId::new("auth0|123");
        assert_eq!(id.as_str(), "auth0|123");
        assert_eq!(id.to_string(), "auth0|123");
        assert_eq!(
            serde_json::to_string(&id).expect("serialize"),
            "\"auth0|123\""
        );
    }

    #[test]
    fn empty_user_id_is_representable() {
        let id = UserId::from("");
        assert!(id.as_str().is_empty());
    }
}
