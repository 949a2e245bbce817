//! Server-side sessions.
//!
//! A session binds a user to the token set returned by the identity provider.
//! It is valid iff it is active and the current time is strictly before its
//! expiry. Logout flips `active` off; rows are kept for audit.

use crate::user::User;
use chrono::{DateTime, Duration, Utc};
use fern_gate_core::{UserId, generate_session_token};
use serde::{Deserialize, Serialize};

/// Session lifetime used when the provider does not report `expires_in`.
#[must_use]
pub fn default_session_lifetime() -> Duration {
    Duration::hours(24)
}

/// Opaque, unguessable session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing session id (e.g. read from a cookie).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh id with 256 bits of CSPRNG entropy.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_session_token())
    }

    /// Returns the session ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a prefix safe to put in logs and error messages.
    #[must_use]
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("{prefix}...")
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tokens returned by the provider's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    /// Lifetime reported by the provider, if any.
    pub expires_in: Option<std::time::Duration>,
}

impl TokenSet {
    /// Creates a token set holding only an access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            id_token: None,
            expires_in: None,
        }
    }

    /// Session lifetime implied by this token set.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.expires_in
            .and_then(|d| Duration::from_std(d).ok())
            .filter(|d| *d > Duration::zero())
            .unwrap_or_else(default_session_lifetime)
    }
}

/// Request metadata captured when a session is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

impl ClientInfo {
    #[must_use]
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// A server-side session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    user_id: UserId,
    /// User snapshot taken at creation time.
    user: Option<User>,
    tokens: TokenSet,
    client: ClientInfo,
    active: bool,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Session {
    /// Creates an active session for `user` starting at `now`.
    #[must_use]
    pub fn establish(
        id: SessionId,
        user: &User,
        tokens: TokenSet,
        client: ClientInfo,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = now + tokens.lifetime();
        Self {
            id,
            user_id: user.id().clone(),
            user: Some(user.clone()),
            tokens,
            client,
            active: true,
            created_at: now,
            expires_at,
            last_activity: now,
        }
    }

    /// Creates a session with all fields specified.
    ///
    /// Use this when reconstituting a session from storage.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn with_all_fields(
        id: SessionId,
        user_id: UserId,
        user: Option<User>,
        tokens: TokenSet,
        client: ClientInfo,
        active: bool,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            user,
            tokens,
            client,
            active,
            created_at,
            expires_at,
            last_activity,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The user snapshot cached at creation, if stored.
    #[must_use]
    pub fn cached_user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.tokens.access_token
    }

    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.tokens.id_token.as_deref()
    }

    #[must_use]
    pub fn client(&self) -> &ClientInfo {
        &self.client
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Returns true if the session is past its expiry at `now`.
    ///
    /// A session expiring exactly at `now` is expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns true iff the session is active and `now < expires_at`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now)
    }

    /// Validity against the wall clock.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Records activity. Expiry is not extended.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_activity = at;
    }

    /// Marks the session inactive.
    pub fn invalidate(&mut self) {
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User::new(UserId::new("u1"), "u1@example.com")
    }

    fn session_at(now: DateTime<Utc>, tokens: TokenSet) -> Session {
        Session::establish(
            SessionId::generate(),
            &user(),
            tokens,
            ClientInfo::new("10.0.0.1", "test-agent"),
            now,
        )
    }

    #[test]
    fn generated_ids_are_unique_and_opaque() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
    }

    #[test]
    fn redacted_id_hides_most_of_the_secret() {
        let id = SessionId::new("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(id.redacted(), "abcdefgh...");
    }

    #[test]
    fn expiry_follows_provider_lifetime() {
        let now = Utc::now();
        let mut tokens = TokenSet::new("at");
        tokens.expires_in = Some(std::time::Duration::from_secs(3600));

        let session = session_at(now, tokens);

        assert_eq!(session.expires_at(), now + Duration::hours(1));
        assert_eq!(session.last_activity(), now);
        assert!(session.is_active());
        assert_eq!(session.user_id().as_str(), "u1");
        assert_eq!(session.cached_user().map(User::email), Some("u1@example.com"));
    }

    #[test]
    fn expiry_falls_back_to_default_lifetime() {
        let now = Utc::now();
        let session = session_at(now, TokenSet::new("at"));
        assert_eq!(session.expires_at(), now + default_session_lifetime());

        let mut zero = TokenSet::new("at");
        zero.expires_in = Some(std::time::Duration::ZERO);
        assert_eq!(session_at(now, zero).expires_at(), now + Duration::hours(24));
    }

    #[test]
    fn validity_is_active_and_strictly_before_expiry() {
        let now = Utc::now();
        let mut session = session_at(now, TokenSet::new("at"));
        let expires = session.expires_at();

        assert!(session.is_valid_at(expires - Duration::milliseconds(1)));
        assert!(!session.is_valid_at(expires));
        assert!(!session.is_valid_at(expires + Duration::seconds(1)));

        session.invalidate();
        assert!(!session.is_valid_at(now));
    }

    #[test]
    fn touch_does_not_extend_expiry() {
        let now = Utc::now();
        let mut session = session_at(now, TokenSet::new("at"));
        let expires = session.expires_at();

        session.touch(now + Duration::hours(2));

        assert_eq!(session.last_activity(), now + Duration::hours(2));
        assert_eq!(session.expires_at(), expires);
    }
}
