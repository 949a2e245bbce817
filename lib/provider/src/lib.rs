//! OAuth2 / OpenID Connect provider integration.
//!
//! - [`OAuthConfig`] describes the provider and how its claims map onto users
//! - [`ProviderClient`] talks to the token, userinfo, and introspection endpoints
//! - [`OAuthFlowCoordinator`] runs the Authorization Code flow (with PKCE for
//!   public clients) and opens sessions
//! - [`TokenValidationChain`] turns a bearer token into an authenticated caller

pub mod claims;
pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod validation;

pub use claims::ProviderClaims;
pub use client::{Introspection, ProviderClient, UserinfoOutcome, discover, http_client};
pub use config::{CALLBACK_PATH, ClaimMapping, DiscoveredEndpoints, LOGIN_PATH, OAuthConfig, OAuthConfigBuilder};
pub use error::{ConfigurationError, FlowError, ProviderError, TokenValidationError};
pub use flow::{CallbackParams, LoginOutcome, LoginStart, LogoutOutcome, OAuthFlowCoordinator, StoredFlowState};
pub use validation::{ConfirmedToken, TokenValidationChain};
