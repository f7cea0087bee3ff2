use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::{CacheError, QuizCache};
use quiz_models::Id;

/// In-memory fake of [`QuizCache`], for unit tests that want a working cache
/// without a Redis instance. A single `Mutex`-guarded state is enough here;
/// unlike the connection fabric's sharded state this isn't on the hot path.
#[derive(Default)]
pub struct InMemoryQuizCache {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    totals: HashMap<(Id, u32), u64>,
    passed: HashMap<(Id, u32), u64>,
    eliminated: HashSet<(Id, Id)>,
    answered: HashSet<(Id, Id, Id)>,
    participants: HashMap<Id, HashSet<Id>>,
    csrf_hashes: HashMap<Id, [u8; 32]>,
    invalidation_marks: HashMap<Id, chrono::DateTime<chrono::Utc>>,
}

impl InMemoryQuizCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuizCache for InMemoryQuizCache {
    async fn incr_total(&self, quiz_id: Id, position: u32) -> Result<(), CacheError> {
        let mut state = self.state.lock().unwrap();
        *state.totals.entry((quiz_id, position)).or_insert(0) += 1;
        Ok(())
    }

    async fn incr_passed(&self, quiz_id: Id, position: u32) -> Result<(), CacheError> {
        let mut state = self.state.lock().unwrap();
        *state.passed.entry((quiz_id, position)).or_insert(0) += 1;
        Ok(())
    }

    async fn pass_rate(&self, quiz_id: Id, position: u32) -> Result<Option<f64>, CacheError> {
        let state = self.state.lock().unwrap();
        let total = state.totals.get(&(quiz_id, position)).copied().unwrap_or(0);
        if total == 0 {
            return Ok(None);
        }
        let passed = state.passed.get(&(quiz_id, position)).copied().unwrap_or(0);
        Ok(Some(passed as f64 / total as f64))
    }

    async fn mark_eliminated(&self, quiz_id: Id, user_id: Id) -> Result<(), CacheError> {
        self.state.lock().unwrap().eliminated.insert((quiz_id, user_id));
        Ok(())
    }

    async fn is_eliminated(&self, quiz_id: Id, user_id: Id) -> Result<bool, CacheError> {
        Ok(self.state.lock().unwrap().eliminated.contains(&(quiz_id, user_id)))
    }

    async fn mark_answered(
        &self,
        quiz_id: Id,
        user_id: Id,
        question_id: Id,
    ) -> Result<(), CacheError> {
        self.state
            .lock()
            .unwrap()
            .answered
            .insert((quiz_id, user_id, question_id));
        Ok(())
    }

    async fn is_answered(
        &self,
        quiz_id: Id,
        user_id: Id,
        question_id: Id,
    ) -> Result<bool, CacheError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .answered
            .contains(&(quiz_id, user_id, question_id)))
    }

    async fn add_participant(&self, quiz_id: Id, user_id: Id) -> Result<(), CacheError> {
        self.state
            .lock()
            .unwrap()
            .participants
            .entry(quiz_id)
            .or_default()
            .insert(user_id);
        Ok(())
    }

    async fn participants(&self, quiz_id: Id) -> Result<HashSet<Id>, CacheError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .participants
            .get(&quiz_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_csrf_secret_hash(
        &self,
        session_id: Id,
        hash: [u8; 32],
    ) -> Result<(), CacheError> {
        self.state.lock().unwrap().csrf_hashes.insert(session_id, hash);
        Ok(())
    }

    async fn csrf_secret_hash(&self, session_id: Id) -> Result<Option<[u8; 32]>, CacheError> {
        Ok(self.state.lock().unwrap().csrf_hashes.get(&session_id).copied())
    }

    async fn set_invalidation_mark(
        &self,
        user_id: Id,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), CacheError> {
        self.state
            .lock()
            .unwrap()
            .invalidation_marks
            .insert(user_id, cutoff);
        Ok(())
    }

    async fn invalidation_mark(
        &self,
        user_id: Id,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, CacheError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .invalidation_marks
            .get(&user_id)
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pass_rate_is_none_until_first_attempt() {
        let cache = InMemoryQuizCache::new();
        let quiz_id = Id::generate();
        assert_eq!(cache.pass_rate(quiz_id, 1).await.unwrap(), None);
        cache.incr_total(quiz_id, 1).await.unwrap();
        cache.incr_passed(quiz_id, 1).await.unwrap();
        assert_eq!(cache.pass_rate(quiz_id, 1).await.unwrap(), Some(1.0));
    }

    #[tokio::test]
    async fn eliminated_and_answered_flags_are_independent_per_quiz() {
        let cache = InMemoryQuizCache::new();
        let (quiz_a, quiz_b) = (Id::generate(), Id::generate());
        let user = Id::generate();
        cache.mark_eliminated(quiz_a, user).await.unwrap();
        assert!(cache.is_eliminated(quiz_a, user).await.unwrap());
        assert!(!cache.is_eliminated(quiz_b, user).await.unwrap());
    }
}
