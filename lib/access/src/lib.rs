//! Identity, session, and authorization engine for fern-gate.
//!
//! This crate provides:
//! - Users, roles, and role derivation from provider groups
//! - Scope grants and the scope matcher
//! - Project permission records with a strict level hierarchy
//! - `SessionLifecycle`: creation, validation, and invalidation of sessions
//! - `AuthorizationEngine`: admin/manager checks, team membership, grant evaluation
//! - `IdentityResolver`: find-or-create of users from provider claims
//! - `UserStore` / `SessionStore` traits with in-memory implementations
//!
//! # Access Control Model
//!
//! - Admins can do everything; the check short-circuits before any grant lookup
//! - Managers manage every team
//! - Anyone else is governed by team groups (`<team>-users`, `<team>-managers`)
//!   and by explicit, optionally expiring scope grants
//!
//! # Example
//!
//! ```
//! use fern_gate_access::scope;
//! use fern_gate_access::{Role, RoleMapping};
//!
//! assert!(scope::matches("project:read:P1", "P1", "read"));
//! assert!(!scope::matches("project:read:P1", "P1", "write"));
//! assert!(!scope::matches("project:read", "P1", "read"));
//!
//! let groups = vec!["/admin".to_string()];
//! assert_eq!(RoleMapping::new().derive_role(&groups), Role::Admin);
//! ```

pub mod authz;
pub mod caller;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod memory;
pub mod permission;
pub mod role;
pub mod scope;
pub mod session;
pub mod store;
pub mod user;

pub use authz::AuthorizationEngine;
pub use caller::{AuthenticatedCaller, SERVICE_ACCOUNT_SUBJECT};
pub use error::{AuthenticationError, AuthorizationError, StoreError};
pub use identity::{IdentityClaims, IdentityResolver, ResolvedIdentity};
pub use lifecycle::SessionLifecycle;
pub use memory::{InMemorySessionStore, InMemoryUserStore};
pub use permission::{PermissionLevel, ProjectPermission};
pub use role::{Role, RoleMapping};
pub use scope::ScopeGrant;
pub use session::{ClientInfo, Session, SessionId, TokenSet};
pub use store::{SessionStore, UserStore};
pub use user::{AccountStatus, User};
