//! fern-gate HTTP server.
//!
//! This crate wires the access engine and the identity provider integration
//! into an axum application: login/callback/logout routes, the request gate,
//! the authorization API, and the Postgres stores.

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;

pub use app::{AppState, router};
