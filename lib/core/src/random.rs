//! Cryptographically secure opaque token generation.
//!
//! Session identifiers and OAuth `state` values are bearer secrets: anyone who
//! can guess one can hijack a login or a session. They are drawn from the
//! thread-local CSPRNG and encoded as unpadded URL-safe base64.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

/// Number of random bytes in session ids and state values (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Returns `len` random bytes encoded as unpadded URL-safe base64.
#[must_use]
pub fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates an OAuth `state` value for CSRF binding.
#[must_use]
pub fn generate_state() -> String {
    random_url_safe(TOKEN_BYTES)
}

/// Generates an opaque session identifier.
#[must_use]
pub fn generate_session_token() -> String {
    random_url_safe(TOKEN_BYTES)
}
