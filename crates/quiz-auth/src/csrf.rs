//! Double Submit Cookie CSRF defense (§4.8, GLOSSARY). The `__Host-csrf-secret`
//! cookie carries a random secret (HttpOnly, never read by JS); the JSON
//! body returns `SHA-256(secret)` as `csrfToken` over a channel JS *can*
//! read. A mutating request echoes that hash back in `X-CSRF-Token`;
//! middleware recomputes the hash from the cookie and compares in constant
//! time, so a cross-site request — which can send the cookie automatically
//! but cannot read it to compute the header — fails.

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The raw secret that lives in the `__Host-csrf-secret` cookie.
#[derive(Clone)]
pub struct CsrfSecret([u8; 32]);

impl CsrfSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_cookie_value(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_cookie_value(value: &str) -> Option<Self> {
        let bytes = hex::decode(value).ok()?;
        Some(Self(bytes.try_into().ok()?))
    }

    /// The value returned to the client as `csrfToken` and later echoed
    /// back in `X-CSRF-Token`.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.finalize().into()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }
}

/// Recomputes the hash of `cookie_secret` and compares it to
/// `presented_header_hash` in constant time, per §4.8's middleware
/// requirement.
pub fn verify_double_submit(cookie_secret: &CsrfSecret, presented_header_hash: &str) -> bool {
    let Ok(presented) = hex::decode(presented_header_hash) else {
        return false;
    };
    if presented.len() != 32 {
        return false;
    }
    cookie_secret.hash().ct_eq(&presented[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_secret_and_hash_verify() {
        let secret = CsrfSecret::generate();
        assert!(verify_double_submit(&secret, &secret.hash_hex()));
    }

    #[test]
    fn mismatched_hash_is_rejected() {
        let secret = CsrfSecret::generate();
        let other = CsrfSecret::generate();
        assert!(!verify_double_submit(&secret, &other.hash_hex()));
    }

    #[test]
    fn malformed_header_is_rejected_not_panicked() {
        let secret = CsrfSecret::generate();
        assert!(!verify_double_submit(&secret, "not-hex"));
        assert!(!verify_double_submit(&secret, ""));
    }

    #[test]
    fn cookie_value_round_trips() {
        let secret = CsrfSecret::generate();
        let cookie = secret.to_cookie_value();
        let parsed = CsrfSecret::from_cookie_value(&cookie).unwrap();
        assert_eq!(secret.hash(), parsed.hash());
    }
}
