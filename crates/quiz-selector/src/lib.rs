//! The adaptive question selector of §4.5: picks the next question's
//! difficulty from the previous position's pass rate, then resolves a
//! concrete question via a hybrid quiz-local-then-pool source preference
//! with a difficulty fallback scan. Grounded in the selection-policy shape
//! of `crates/derive-register`'s small, pure "compute a plan, then resolve
//! resources" split — the difficulty computation here is plain arithmetic
//! over cache reads, kept separate from the repository fan-out that
//! follows it.

use quiz_cache::QuizCache;
use quiz_config::DifficultySettings;
use quiz_errors::AppError;
use quiz_models::{Difficulty, Id, Question};
use quiz_repo::QuestionRepo;

/// No pass-rate data recorded yet for the prior position.
const NO_DATA: f64 = -1.0;

/// Computes the target difficulty for position `i` (1-based) per §4.5
/// steps 1-3. `i == 1` always uses the configured base difficulty for
/// position 1; later positions compare the prior position's pass rate
/// against its target, adjusting by one step outside the threshold band.
pub async fn target_difficulty(
    cache: &dyn QuizCache,
    settings: &DifficultySettings,
    quiz_id: Id,
    position: u32,
) -> Result<Difficulty, AppError> {
    let base = base_for_position(settings, position);

    if position <= 1 {
        return Ok(base);
    }

    let prior_position = position - 1;
    let pass_rate = cache
        .pass_rate(quiz_id, prior_position)
        .await
        .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?
        .unwrap_or(NO_DATA);

    if pass_rate < 0.0 {
        return Ok(base);
    }

    let target = target_for_position(settings, prior_position);
    let diff = pass_rate - target;

    if diff > settings.adaptation_threshold {
        Ok(base.bump(1))
    } else if diff < -settings.adaptation_threshold {
        Ok(base.bump(-1))
    } else {
        Ok(base)
    }
}

fn base_for_position(settings: &DifficultySettings, position: u32) -> Difficulty {
    let idx = (position.saturating_sub(1) as usize).min(settings.base_map.len().saturating_sub(1));
    let raw = settings.base_map.get(idx).copied().unwrap_or(1);
    Difficulty::new(raw)
}

fn target_for_position(settings: &DifficultySettings, position: u32) -> f64 {
    let idx = (position.saturating_sub(1) as usize).min(settings.target_pass_rates.len().saturating_sub(1));
    settings.target_pass_rates.get(idx).copied().unwrap_or(0.5)
}

/// Resolves a concrete question for `quiz_id` at position `i`, given the
/// set of question ids already used in this run. Implements the hybrid
/// source preference (quiz-local, then pool) and the difficulty fallback
/// scan of §4.5 steps 4-5.
pub async fn select_question(
    repo: &dyn QuestionRepo,
    cache: &dyn QuizCache,
    settings: &DifficultySettings,
    quiz_id: Id,
    position: u32,
    used: &[Id],
) -> Result<Question, AppError> {
    let target = target_difficulty(cache, settings, quiz_id, position).await?;

    if let Some(question) = try_difficulty(repo, quiz_id, target, used).await? {
        return Ok(question);
    }

    for difficulty in fallback_scan(target, settings.fallback_to_higher) {
        if let Some(question) = try_difficulty(repo, quiz_id, difficulty, used).await? {
            return Ok(question);
        }
    }

    Err(AppError::NotFound(format!(
        "no unused question available for quiz {quiz_id} at position {position}"
    )))
}

async fn try_difficulty(
    repo: &dyn QuestionRepo,
    quiz_id: Id,
    difficulty: Difficulty,
    used: &[Id],
) -> Result<Option<Question>, AppError> {
    if let Some(question) = repo
        .random_unused_quiz_question(quiz_id, difficulty, used)
        .await?
    {
        return Ok(Some(question));
    }
    repo.random_unused_pool_question(difficulty, used).await
}

/// The difficulty scan order of §4.5 step 5: default (`fallback_to_higher
/// = true`) ascends from `target+1` to `MAX`, then descends from
/// `target-1` to `MIN`; the flag reverses which direction is tried first.
fn fallback_scan(target: Difficulty, fallback_to_higher: bool) -> Vec<Difficulty> {
    let min = Difficulty::MIN.get();
    let max = Difficulty::MAX.get();
    let t = target.get();

    let ascending: Vec<Difficulty> = ((t + 1)..=max).map(Difficulty::new).collect();
    let descending: Vec<Difficulty> = (min..t).rev().map(Difficulty::new).collect();

    if fallback_to_higher {
        ascending.into_iter().chain(descending).collect()
    } else {
        descending.into_iter().chain(ascending).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quiz_cache::CacheError;
    use quiz_models::QuestionOption;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    fn settings() -> DifficultySettings {
        DifficultySettings {
            target_pass_rates: vec![0.90, 0.85, 0.78, 0.70, 0.62, 0.55, 0.48, 0.42, 0.36, 0.50],
            base_map: vec![1, 2, 2, 3, 3, 4, 4, 5, 5, 5],
            adaptation_threshold: 0.10,
            fallback_to_higher: true,
        }
    }

    fn question(id: Id, quiz_id: Option<Id>, difficulty: i16) -> Question {
        Question {
            id,
            quiz_id,
            text: "what?".into(),
            options: vec![QuestionOption { text: "a".into() }, QuestionOption { text: "b".into() }],
            correct_option: 0,
            time_limit_sec: 20,
            point_value: 1,
            difficulty: Difficulty::new(difficulty),
            is_used: false,
        }
    }

    #[derive(Default)]
    struct FakeQuestionRepo {
        quiz_local: Mutex<Vec<Question>>,
        pool: Mutex<Vec<Question>>,
    }

    #[async_trait]
    impl QuestionRepo for FakeQuestionRepo {
        async fn find_by_id(&self, id: Id) -> Result<Option<Question>, AppError> {
            Ok(self
                .quiz_local
                .lock()
                .unwrap()
                .iter()
                .chain(self.pool.lock().unwrap().iter())
                .find(|q| q.id == id)
                .cloned())
        }

        async fn random_unused_quiz_question(
            &self,
            quiz_id: Id,
            difficulty: Difficulty,
            exclude: &[Id],
        ) -> Result<Option<Question>, AppError> {
            let excluded: HashSet<Id> = exclude.iter().copied().collect();
            Ok(self
                .quiz_local
                .lock()
                .unwrap()
                .iter()
                .find(|q| {
                    q.quiz_id == Some(quiz_id)
                        && !q.is_used
                        && q.difficulty.get() == difficulty.get()
                        && !excluded.contains(&q.id)
                })
                .cloned())
        }

        async fn random_unused_pool_question(
            &self,
            difficulty: Difficulty,
            exclude: &[Id],
        ) -> Result<Option<Question>, AppError> {
            let excluded: HashSet<Id> = exclude.iter().copied().collect();
            Ok(self
                .pool
                .lock()
                .unwrap()
                .iter()
                .find(|q| {
                    !q.is_used && q.difficulty.get() == difficulty.get() && !excluded.contains(&q.id)
                })
                .cloned())
        }

        async fn mark_used_batch(&self, _ids: &[Id]) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeCache {
        pass_rates: Mutex<HashMap<(Id, u32), f64>>,
    }

    #[async_trait]
    impl QuizCache for FakeCache {
        async fn incr_total(&self, _quiz_id: Id, _position: u32) -> Result<(), CacheError> {
            Ok(())
        }
        async fn incr_passed(&self, _quiz_id: Id, _position: u32) -> Result<(), CacheError> {
            Ok(())
        }
        async fn pass_rate(&self, quiz_id: Id, position: u32) -> Result<Option<f64>, CacheError> {
            Ok(self.pass_rates.lock().unwrap().get(&(quiz_id, position)).copied())
        }
        async fn mark_eliminated(&self, _quiz_id: Id, _user_id: Id) -> Result<(), CacheError> {
            Ok(())
        }
        async fn is_eliminated(&self, _quiz_id: Id, _user_id: Id) -> Result<bool, CacheError> {
            Ok(false)
        }
        async fn mark_answered(&self, _quiz_id: Id, _user_id: Id, _question_id: Id) -> Result<(), CacheError> {
            Ok(())
        }
        async fn is_answered(&self, _quiz_id: Id, _user_id: Id, _question_id: Id) -> Result<bool, CacheError> {
            Ok(false)
        }
        async fn add_participant(&self, _quiz_id: Id, _user_id: Id) -> Result<(), CacheError> {
            Ok(())
        }
        async fn participants(&self, _quiz_id: Id) -> Result<HashSet<Id>, CacheError> {
            Ok(HashSet::new())
        }
        async fn set_csrf_secret_hash(&self, _session_id: Id, _hash: [u8; 32]) -> Result<(), CacheError> {
            Ok(())
        }
        async fn csrf_secret_hash(&self, _session_id: Id) -> Result<Option<[u8; 32]>, CacheError> {
            Ok(None)
        }
        async fn set_invalidation_mark(
            &self,
            _user_id: Id,
            _cutoff: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), CacheError> {
            Ok(())
        }
        async fn invalidation_mark(
            &self,
            _user_id: Id,
        ) -> Result<Option<chrono::DateTime<chrono::Utc>>, CacheError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn position_one_uses_base_difficulty() {
        let cache = FakeCache::default();
        let quiz_id = Id::generate();
        let difficulty = target_difficulty(&cache, &settings(), quiz_id, 1).await.unwrap();
        assert_eq!(difficulty.get(), 1);
    }

    #[tokio::test]
    async fn no_data_falls_back_to_base() {
        let cache = FakeCache::default();
        let quiz_id = Id::generate();
        // position 3's base is 2; no pass_rate recorded for position 2.
        let difficulty = target_difficulty(&cache, &settings(), quiz_id, 3).await.unwrap();
        assert_eq!(difficulty.get(), 2);
    }

    #[tokio::test]
    async fn pass_rate_far_above_target_bumps_up() {
        let cache = FakeCache::default();
        let quiz_id = Id::generate();
        // position 3's base is 2, prior position (2) target is 0.85.
        cache.pass_rates.lock().unwrap().insert((quiz_id, 2), 0.99);
        let difficulty = target_difficulty(&cache, &settings(), quiz_id, 3).await.unwrap();
        assert_eq!(difficulty.get(), 3);
    }

    #[tokio::test]
    async fn pass_rate_far_below_target_bumps_down() {
        let cache = FakeCache::default();
        let quiz_id = Id::generate();
        cache.pass_rates.lock().unwrap().insert((quiz_id, 2), 0.50);
        let difficulty = target_difficulty(&cache, &settings(), quiz_id, 3).await.unwrap();
        assert_eq!(difficulty.get(), 1);
    }

    #[tokio::test]
    async fn pass_rate_within_threshold_keeps_base() {
        let cache = FakeCache::default();
        let quiz_id = Id::generate();
        cache.pass_rates.lock().unwrap().insert((quiz_id, 2), 0.80);
        let difficulty = target_difficulty(&cache, &settings(), quiz_id, 3).await.unwrap();
        assert_eq!(difficulty.get(), 2);
    }

    #[tokio::test]
    async fn hybrid_source_prefers_quiz_local_over_pool() {
        let quiz_id = Id::generate();
        let local_id = Id::generate();
        let pool_id = Id::generate();
        let repo = FakeQuestionRepo::default();
        repo.quiz_local.lock().unwrap().push(question(local_id, Some(quiz_id), 1));
        repo.pool.lock().unwrap().push(question(pool_id, None, 1));
        let cache = FakeCache::default();

        let picked = select_question(&repo, &cache, &settings(), quiz_id, 1, &[])
            .await
            .unwrap();
        assert_eq!(picked.id, local_id);
    }

    #[tokio::test]
    async fn hybrid_source_falls_back_to_pool_on_quiz_local_miss() {
        let quiz_id = Id::generate();
        let pool_id = Id::generate();
        let repo = FakeQuestionRepo::default();
        repo.pool.lock().unwrap().push(question(pool_id, None, 1));
        let cache = FakeCache::default();

        let picked = select_question(&repo, &cache, &settings(), quiz_id, 1, &[])
            .await
            .unwrap();
        assert_eq!(picked.id, pool_id);
    }

    #[tokio::test]
    async fn ascend_then_descend_fallback_order_by_default() {
        let quiz_id = Id::generate();
        let near_id = Id::generate();
        let far_id = Id::generate();
        let repo = FakeQuestionRepo::default();
        // Target for position 1 is difficulty 1; nothing at 1, so the
        // ascending scan (2, 3, 4, 5) should hit difficulty 2 before ever
        // considering difficulty 5.
        repo.pool.lock().unwrap().push(question(far_id, None, 5));
        repo.pool.lock().unwrap().push(question(near_id, None, 2));

        let picked = select_question(&repo, &FakeCache::default(), &settings(), quiz_id, 1, &[])
            .await
            .unwrap();
        assert_eq!(picked.id, near_id);
    }

    #[tokio::test]
    async fn descend_first_when_fallback_to_higher_is_false() {
        let quiz_id = Id::generate();
        let mut cfg = settings();
        cfg.fallback_to_higher = false;
        // Target for position 1 is base_map[0] = 1, so there's nothing
        // below 1 to descend to; use position with base 3 instead.
        cfg.base_map = vec![3];
        let lower_id = Id::generate();
        let higher_id = Id::generate();
        let repo = FakeQuestionRepo::default();
        repo.pool.lock().unwrap().push(question(lower_id, None, 2));
        repo.pool.lock().unwrap().push(question(higher_id, None, 4));

        let picked = select_question(&repo, &FakeCache::default(), &cfg, quiz_id, 1, &[])
            .await
            .unwrap();
        assert_eq!(picked.id, lower_id);
    }

    #[tokio::test]
    async fn no_question_anywhere_is_not_found() {
        let quiz_id = Id::generate();
        let repo = FakeQuestionRepo::default();
        let err = select_question(&repo, &FakeCache::default(), &settings(), quiz_id, 1, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
