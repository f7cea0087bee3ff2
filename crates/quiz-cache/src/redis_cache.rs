use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::collections::HashSet;

use crate::{keys, CacheError, QuizCache};
use quiz_models::Id;

/// Redis-backed implementation of [`QuizCache`]. Uses a `ConnectionManager`
/// so callers share one multiplexed connection and reconnect transparently,
/// the same pattern the pack's reference Redis client uses.
#[derive(Clone)]
pub struct RedisQuizCache {
    conn: ConnectionManager,
}

impl RedisQuizCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(Self { conn })
    }
}

fn map_err(err: redis::RedisError) -> CacheError {
    CacheError::Unavailable(err.to_string())
}

#[async_trait]
impl QuizCache for RedisQuizCache {
    async fn incr_total(&self, quiz_id: Id, position: u32) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = keys::total_key(quiz_id, position);
        let _: () = conn.incr(&key, 1).await.map_err(map_err)?;
        let _: () = conn
            .expire(&key, keys::PASS_RATE_TTL_SECS as i64)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn incr_passed(&self, quiz_id: Id, position: u32) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = keys::passed_key(quiz_id, position);
        let _: () = conn.incr(&key, 1).await.map_err(map_err)?;
        let _: () = conn
            .expire(&key, keys::PASS_RATE_TTL_SECS as i64)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn pass_rate(&self, quiz_id: Id, position: u32) -> Result<Option<f64>, CacheError> {
        let mut conn = self.conn.clone();
        let total: Option<i64> = conn
            .get(keys::total_key(quiz_id, position))
            .await
            .map_err(map_err)?;
        let Some(total) = total.filter(|t| *t > 0) else {
            return Ok(None);
        };
        let passed: i64 = conn
            .get(keys::passed_key(quiz_id, position))
            .await
            .map_err(map_err)?
            .unwrap_or(0);
        Ok(Some(passed as f64 / total as f64))
    }

    async fn mark_eliminated(&self, quiz_id: Id, user_id: Id) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = keys::eliminated_key(quiz_id, user_id);
        let _: () = conn
            .set_ex(&key, true, keys::ELIMINATED_TTL_SECS)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn is_eliminated(&self, quiz_id: Id, user_id: Id) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(keys::eliminated_key(quiz_id, user_id))
            .await
            .map_err(map_err)?;
        Ok(exists)
    }

    async fn mark_answered(
        &self,
        quiz_id: Id,
        user_id: Id,
        question_id: Id,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = keys::answered_key(quiz_id, user_id, question_id);
        let _: () = conn
            .set_ex(&key, true, keys::ANSWERED_TTL_SECS)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn is_answered(
        &self,
        quiz_id: Id,
        user_id: Id,
        question_id: Id,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(keys::answered_key(quiz_id, user_id, question_id))
            .await
            .map_err(map_err)?;
        Ok(exists)
    }

    async fn add_participant(&self, quiz_id: Id, user_id: Id) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .sadd(keys::participants_key(quiz_id), user_id.to_string())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn participants(&self, quiz_id: Id) -> Result<HashSet<Id>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: HashSet<String> = conn
            .smembers(keys::participants_key(quiz_id))
            .await
            .map_err(map_err)?;
        Ok(raw
            .into_iter()
            .filter_map(|s| s.parse::<Id>().ok())
            .collect())
    }

    async fn set_csrf_secret_hash(
        &self,
        session_id: Id,
        hash: [u8; 32],
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                keys::csrf_secret_key(session_id),
                hex::encode(hash),
                keys::CSRF_SECRET_TTL_SECS,
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn csrf_secret_hash(&self, session_id: Id) -> Result<Option<[u8; 32]>, CacheError> {
        let mut conn = self.conn.clone();
        let hex_str: Option<String> = conn
            .get(keys::csrf_secret_key(session_id))
            .await
            .map_err(map_err)?;
        Ok(hex_str.and_then(|s| {
            let bytes = hex::decode(s).ok()?;
            bytes.try_into().ok()
        }))
    }

    async fn set_invalidation_mark(
        &self,
        user_id: Id,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(keys::invalidation_mark_key(user_id), cutoff.timestamp())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn invalidation_mark(
        &self,
        user_id: Id,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, CacheError> {
        let mut conn = self.conn.clone();
        let secs: Option<i64> = conn
            .get(keys::invalidation_mark_key(user_id))
            .await
            .map_err(map_err)?;
        Ok(secs.and_then(|s| chrono::DateTime::from_timestamp(s, 0)))
    }
}
