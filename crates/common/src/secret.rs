//! Secret wrappers for values that must never reach a log line.
//!
//! Huddle handles two kinds of secret material: the bearer token a client
//! presents when it opens a session, and the operator's admin token guarding
//! the status endpoint. Both travel as [`SecretString`], whose `Debug` output
//! is redacted, so deriving `Debug` on a struct holding one stays safe.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct OpenRequest {
//!     client: String,
//!     token: SecretString,
//! }
//!
//! let req = OpenRequest {
//!     client: "browser".to_string(),
//!     token: SecretString::from("bearer-abc"),
//! };
//! assert!(!format!("{req:?}").contains("bearer-abc"));
//! assert_eq!(req.token.expose_secret(), "bearer-abc");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Compare a presented secret against the expected one without
/// short-circuiting on the first mismatching byte.
#[must_use]
pub fn secrets_match(presented: &str, expected: &SecretString) -> bool {
    let expected = expected.expose_secret().as_bytes();
    let presented = presented.as_bytes();
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("session-token");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("session-token"));
    }

    #[test]
    fn test_deserialized_credentials_stay_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Handshake {
            client: String,
            token: SecretString,
        }

        let json = r#"{"client": "web", "token": "tok-123"}"#;
        let handshake: Handshake = serde_json::from_str(json).expect("deserialize");

        assert_eq!(handshake.token.expose_secret(), "tok-123");
        let debug = format!("{handshake:?}");
        assert!(debug.contains("web"));
        assert!(!debug.contains("tok-123"));
    }

    #[test]
    fn test_secrets_match() {
        let expected = SecretString::from("admin-token");
        assert!(secrets_match("admin-token", &expected));
        assert!(!secrets_match("admin-tokem", &expected));
        assert!(!secrets_match("admin", &expected));
        assert!(!secrets_match("", &expected));
    }
}
