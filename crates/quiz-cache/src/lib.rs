pub mod backplane;
pub mod keys;
pub mod memory;
pub mod redis_cache;

use async_trait::async_trait;
use quiz_models::Id;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// The cache-store contract of §4.5/§4.6/§4.8: pass-rate counters,
/// elimination/answered flags, the durable participants set, and CSRF
/// secret hashes. Pass-rate counters are deliberately cache-only — they
/// are operational telemetry and must never gate ranking (§9); ranking
/// relies solely on `UserAnswer`/`Result` rows in the repository layer.
///
/// A transient cache miss degrades gracefully per §7: missing pass-rate
/// data means "no data" (selector falls back to the base difficulty), and
/// a missing answered-flag means "unanswered" (the conservative choice for
/// the elimination sweep).
#[async_trait]
pub trait QuizCache: Send + Sync {
    async fn incr_total(&self, quiz_id: Id, position: u32) -> Result<(), CacheError>;
    async fn incr_passed(&self, quiz_id: Id, position: u32) -> Result<(), CacheError>;

    /// Returns `None` if there is no recorded data for this position (cache
    /// miss or zero total), which the selector treats as "pass rate -1".
    async fn pass_rate(&self, quiz_id: Id, position: u32) -> Result<Option<f64>, CacheError>;

    async fn mark_eliminated(&self, quiz_id: Id, user_id: Id) -> Result<(), CacheError>;
    async fn is_eliminated(&self, quiz_id: Id, user_id: Id) -> Result<bool, CacheError>;

    async fn mark_answered(
        &self,
        quiz_id: Id,
        user_id: Id,
        question_id: Id,
    ) -> Result<(), CacheError>;
    async fn is_answered(
        &self,
        quiz_id: Id,
        user_id: Id,
        question_id: Id,
    ) -> Result<bool, CacheError>;

    async fn add_participant(&self, quiz_id: Id, user_id: Id) -> Result<(), CacheError>;
    async fn participants(&self, quiz_id: Id) -> Result<std::collections::HashSet<Id>, CacheError>;

    /// Stores the hash of the CSRF secret most recently issued for a
    /// session, so a prior secret is implicitly invalidated the moment a
    /// refresh issues a new one.
    async fn set_csrf_secret_hash(
        &self,
        session_id: Id,
        hash: [u8; 32],
    ) -> Result<(), CacheError>;
    async fn csrf_secret_hash(&self, session_id: Id) -> Result<Option<[u8; 32]>, CacheError>;

    /// Write-through invalidation mark, fanned out over the backplane so
    /// other instances drop their local cache of it (§5).
    async fn set_invalidation_mark(
        &self,
        user_id: Id,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), CacheError>;
    async fn invalidation_mark(
        &self,
        user_id: Id,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, CacheError>;
}
