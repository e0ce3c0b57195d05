//! Signed admin session tokens.
//!
//! Token format: `expiry.nonce.signature`, where `expiry` is unix seconds,
//! `nonce` is 16 random bytes and `signature` is
//! HMAC-SHA256(secret, "expiry.nonce"). Both binary parts are base64url
//! without padding. Nothing is stored server side; a token is valid until
//! it expires or the secret changes.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::store::unix_now;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "adm";
pub const SESSION_TTL_SECS: i64 = 12 * 60 * 60;

const NONCE_LEN: usize = 16;

#[derive(Clone)]
pub struct SessionAuthenticator {
    secret: Vec<u8>,
}

impl SessionAuthenticator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    pub fn issue(&self) -> String {
        self.issue_at(unix_now())
    }

    /// Token valid until `now + SESSION_TTL_SECS`.
    pub fn issue_at(&self, now: i64) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let payload = format!("{}.{}", now + SESSION_TTL_SECS, URL_SAFE_NO_PAD.encode(nonce));
        let signature = self.sign(&payload);
        format!("{payload}.{signature}")
    }

    pub fn verify(&self, token: &str) -> bool {
        self.verify_at(token, unix_now())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> bool {
        let parts: Vec<&str> = token.split('.').collect();
        let [expiry, nonce, signature] = parts.as_slice() else {
            return false;
        };

        let Ok(expires_at) = expiry.parse::<i64>() else {
            return false;
        };
        if expires_at < now {
            return false;
        }

        // Signed over the fields exactly as received.
        let expected = self.sign(&format!("{expiry}.{nonce}"));
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

/// Compare without an early exit on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// `Set-Cookie` value carrying a fresh session.
pub fn session_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Path=/admin; HttpOnly; Secure; SameSite=Lax; Max-Age={SESSION_TTL_SECS}"
    )
}

/// `Set-Cookie` value that removes the session.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/admin; HttpOnly; Secure; SameSite=Lax; Max-Age=0")
}

/// Session token from a `Cookie` request header, if present.
pub fn token_from_cookie_header(cookie_header: &str) -> Option<&str> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_issued_token_verifies() {
        let auth = SessionAuthenticator::new("hunter2");
        let token = auth.issue_at(NOW);
        assert!(auth.verify_at(&token, NOW));
        assert!(auth.verify_at(&token, NOW + SESSION_TTL_SECS));
        assert!(auth.verify(&auth.issue()));
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = SessionAuthenticator::new("hunter2");
        let token = auth.issue_at(NOW);
        assert!(!auth.verify_at(&token, NOW + SESSION_TTL_SECS + 1));
    }

    #[test]
    fn test_tokens_are_unique() {
        let auth = SessionAuthenticator::new("hunter2");
        assert_ne!(auth.issue_at(NOW), auth.issue_at(NOW));
    }

    #[test]
    fn test_signature_bit_flip_rejected() {
        let auth = SessionAuthenticator::new("hunter2");
        let token = auth.issue_at(NOW);
        let (payload, signature) = token.rsplit_once('.').unwrap();

        let mut raw = URL_SAFE_NO_PAD.decode(signature).unwrap();
        raw[0] ^= 0x01;
        let tampered = format!("{payload}.{}", URL_SAFE_NO_PAD.encode(raw));
        assert!(!auth.verify_at(&tampered, NOW));
    }

    #[test]
    fn test_extended_expiry_rejected() {
        let auth = SessionAuthenticator::new("hunter2");
        let token = auth.issue_at(NOW);
        let later = (NOW + 10 * SESSION_TTL_SECS).to_string();
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[0] = &later;
        assert!(!auth.verify_at(&parts.join("."), NOW));
    }

    #[test]
    fn test_reformatted_expiry_rejected() {
        let auth = SessionAuthenticator::new("hunter2");
        let token = auth.issue_at(NOW);
        let (expiry, rest) = token.split_once('.').unwrap();

        for variant in [format!("+{expiry}"), format!("0{expiry}")] {
            let forged = format!("{variant}.{rest}");
            assert!(!auth.verify_at(&forged, NOW), "{forged:?} should be rejected");
        }
        assert!(auth.verify_at(&format!("{expiry}.{rest}"), NOW));
    }

    #[test]
    fn test_other_secret_rejected() {
        let token = SessionAuthenticator::new("hunter2").issue_at(NOW);
        assert!(!SessionAuthenticator::new("hunter3").verify_at(&token, NOW));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let auth = SessionAuthenticator::new("hunter2");
        for token in ["", "a.b", "a.b.c.d", "soon.nonce.sig", "..."] {
            assert!(!auth.verify_at(token, NOW), "{token:?} should be rejected");
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_cookie_helpers() {
        let set = session_cookie("tok");
        assert!(set.starts_with("adm=tok; Path=/admin; HttpOnly; Secure; SameSite=Lax"));
        assert!(set.ends_with("Max-Age=43200"));
        assert!(clear_session_cookie().ends_with("Max-Age=0"));

        assert_eq!(token_from_cookie_header("theme=dark; adm=abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(token_from_cookie_header("adm="), None);
        assert_eq!(token_from_cookie_header("admin=x"), None);
    }
}
