//! Core types shared by the fern-gate crates.
//!
//! This crate provides identifiers, the rootcause-based `Result` alias, and
//! secure random token generation for session ids and OAuth state.

pub mod error;
pub mod id;
pub mod random;

pub use error::Result;
pub use id::{GrantId, ParseIdError, PermissionId, UserId};
pub use random::{generate_session_token, generate_state, random_url_safe};
