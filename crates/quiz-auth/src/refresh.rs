//! Opaque refresh tokens (§3, §4.8): a random string handed to the client
//! once, stored only as its SHA-256 hash. `rotate` implements the whole of
//! §4.8's "presenting a refresh token atomically" sequence except for the
//! actual DB calls, which the caller (`AuthManager`) threads through the
//! `AuthRepo` so this module stays storage-agnostic and unit-testable.

use quiz_models::Id;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const REFRESH_TOKEN_BYTES: usize = 32;

/// A freshly minted refresh token: the plaintext (returned to the client
/// exactly once) and the hash (the only thing ever persisted).
pub struct NewRefreshToken {
    pub plaintext: String,
    pub hash: [u8; 32],
}

pub fn generate() -> NewRefreshToken {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = hex::encode(bytes);
    NewRefreshToken {
        hash: hash_token(&plaintext),
        plaintext,
    }
}

pub fn hash_token(plaintext: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.finalize().into()
}

/// Given a user's currently active refresh tokens (oldest first) and the
/// configured `session_limit`, returns the ids that must be revoked to
/// make room for one more (the new one about to be inserted) — so the
/// post-insert count is exactly `session_limit`. §4.8: "revoking the
/// oldest active refresh tokens until only `max_sessions - 1` remain".
pub fn sessions_to_evict(active_oldest_first: &[Id], session_limit: u32) -> Vec<Id> {
    let keep = session_limit.saturating_sub(1) as usize;
    if active_oldest_first.len() <= keep {
        return Vec::new();
    }
    active_oldest_first[..active_oldest_first.len() - keep].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_hashes_consistently() {
        let token = generate();
        assert_eq!(hash_token(&token.plaintext), token.hash);
    }

    #[test]
    fn two_tokens_are_distinct() {
        let a = generate();
        let b = generate();
        assert_ne!(a.plaintext, b.plaintext);
    }

    #[test]
    fn eviction_keeps_exactly_limit_minus_one() {
        let ids: Vec<Id> = (0..5).map(|_| Id::generate()).collect();
        let evicted = sessions_to_evict(&ids, 3);
        assert_eq!(evicted.len(), 3);
        assert_eq!(&evicted[..], &ids[..3]);
    }

    #[test]
    fn eviction_is_noop_under_the_limit() {
        let ids: Vec<Id> = (0..2).map(|_| Id::generate()).collect();
        assert!(sessions_to_evict(&ids, 10).is_empty());
    }

    #[test]
    fn eviction_handles_limit_of_one() {
        let ids: Vec<Id> = (0..3).map(|_| Id::generate()).collect();
        let evicted = sessions_to_evict(&ids, 1);
        assert_eq!(evicted.len(), 3);
    }
}
