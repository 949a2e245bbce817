//! Centralized server configuration.
//!
//! Loaded once at startup via the `config` crate from environment variables
//! (nested keys use `__`, e.g. `OAUTH__CLIENT_ID`). See
//! [`OAuthConfig`](fern_gate_provider::OAuthConfig) for the provider settings.

use fern_gate_provider::OAuthConfig;
use serde::Deserialize;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Per-request deadline. Dropping the request future cancels in-flight
    /// provider and store calls.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// Session cookie and cleanup settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of the `session_id` cookie, in hours.
    #[serde(default = "default_cookie_max_age_hours")]
    pub cookie_max_age_hours: i64,

    /// Interval between expired-session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Always set the Secure flag. When false, the flag follows the request
    /// scheme (`X-Forwarded-Proto: https`).
    #[serde(default)]
    pub secure_cookies: bool,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_cookie_max_age_hours() -> i64 {
    24
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_max_age_hours: default_cookie_max_age_hours(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: false,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
