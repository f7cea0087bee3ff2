use crate::Id;

/// A refresh token row. The plaintext token is never stored — only its
/// SHA-256 hash — matching §3's invariant.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RefreshToken {
    pub id: Id,
    pub user_id: Id,
    pub token_hash: [u8; 32],
    pub device_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub revoked_at: Option<chrono::DateTime<chrono::Utc>>,
    pub revoked_reason: Option<String>,
}

impl RefreshToken {
    pub fn is_active(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// A JWT signing key. Secret material is stored encrypted at rest
/// (AES-256-GCM); only the decrypted key ever exists in process memory,
/// and only for as long as a single sign/verify call needs it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JwtKey {
    pub kid: String,
    pub encrypted_secret: Vec<u8>,
    pub nonce: [u8; 12],
    pub algorithm: String,
    pub is_active: bool,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub rotated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Global-logout cutoff: an access token signed at or before `cutoff` is
/// rejected regardless of its own expiration.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct InvalidationMark {
    pub user_id: Id,
    pub cutoff: chrono::DateTime<chrono::Utc>,
}
