use quiz_models::Id;

/// Claims embedded in an access token. `sid` is the refresh token's id —
/// carrying it lets logout/logout-all correlate an access token back to
/// the session it was minted from without a second lookup.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessClaims {
    pub sub: Id,
    pub sid: Id,
    /// SHA-256 hash of the CSRF secret current at mint time, base64-encoded.
    /// Verified against the cache's live copy on every mutating request,
    /// not trusted as the sole source of truth (a refresh invalidates the
    /// prior secret immediately).
    pub csrf_hash: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub fn new(user_id: Id, session_id: Id, csrf_hash: String, issued_at: chrono::DateTime<chrono::Utc>, ttl: chrono::Duration) -> Self {
        Self {
            sub: user_id,
            sid: session_id,
            csrf_hash,
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        }
    }

    pub fn issued_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.iat, 0)
    }
}
