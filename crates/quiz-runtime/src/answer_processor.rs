use chrono::Utc;
use quiz_cache::QuizCache;
use quiz_errors::AppError;
use quiz_models::{EliminationReason, Id, Question, UserAnswer};
use quiz_repo::AnswerRepo;

/// Everything the processor needs about the current question and the
/// submission itself; the coordinator assembles this from its read-locked
/// state before calling in, so the processor never touches the lock.
pub struct AnswerContext<'a> {
    pub user_id: Id,
    pub quiz_id: Id,
    pub question: &'a Question,
    pub selected_option: u8,
    pub t_start_ms: i64,
}

#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub is_eliminated: bool,
    pub elimination_reason: Option<EliminationReason>,
    pub time_limit_exceeded: bool,
    pub response_time_ms: i64,
    pub points_earned: i64,
}

/// §4.6 rules 3-9: authoritative timing, grading, elimination decision,
/// durable recording, and pass-rate telemetry. Rules 1-2 (already
/// eliminated / stale answer) are checked by the caller against the
/// coordinator's locked state before this is reached.
pub async fn process_answer(
    cache: &dyn QuizCache,
    answer_repo: &dyn AnswerRepo,
    position: u32,
    ctx: AnswerContext<'_>,
) -> Result<AnswerOutcome, AppError> {
    let t_recv_ms = Utc::now().timestamp_millis();
    let response_time_ms = (t_recv_ms - ctx.t_start_ms).max(0);
    let time_exceeded = t_recv_ms > ctx.t_start_ms + ctx.question.time_limit_sec as i64 * 1000;

    let is_correct = ctx.selected_option == ctx.question.correct_option;
    let will_eliminate = !is_correct || time_exceeded;
    let elimination_reason = if !is_correct {
        Some(EliminationReason::IncorrectAnswer)
    } else if time_exceeded {
        Some(EliminationReason::TimeExceeded)
    } else {
        None
    };

    let points_earned = if is_correct && !time_exceeded {
        ctx.question.point_value as i64
    } else {
        0
    };

    let answer = UserAnswer {
        user_id: ctx.user_id,
        quiz_id: ctx.quiz_id,
        question_id: ctx.question.id,
        selected_option: Some(ctx.selected_option),
        is_correct,
        response_time_ms,
        score: points_earned,
        is_eliminated: will_eliminate,
        elimination_reason,
    };
    // The unique constraint on (user, quiz, question) is the final
    // at-most-once guard; a racing duplicate submission surfaces here as
    // `ConflictKind::AlreadyAnswered` even though the cache check above
    // should normally have caught it first.
    answer_repo.record_answer(&answer).await?;

    if will_eliminate {
        cache
            .mark_eliminated(ctx.quiz_id, ctx.user_id)
            .await
            .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?;
    }
    cache
        .mark_answered(ctx.quiz_id, ctx.user_id, ctx.question.id)
        .await
        .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?;

    cache
        .incr_total(ctx.quiz_id, position)
        .await
        .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?;
    if is_correct && !time_exceeded {
        cache
            .incr_passed(ctx.quiz_id, position)
            .await
            .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?;
    }

    Ok(AnswerOutcome {
        is_correct,
        is_eliminated: will_eliminate,
        elimination_reason,
        time_limit_exceeded: time_exceeded,
        response_time_ms,
        points_earned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quiz_cache::CacheError;
    use quiz_models::QuestionOption;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAnswerRepo {
        recorded: Mutex<Vec<UserAnswer>>,
    }

    #[async_trait]
    impl AnswerRepo for FakeAnswerRepo {
        async fn record_answer(&self, answer: &UserAnswer) -> Result<(), AppError> {
            self.recorded.lock().unwrap().push(answer.clone());
            Ok(())
        }
        async fn list_for_quiz(&self, _quiz_id: Id) -> Result<Vec<UserAnswer>, AppError> {
            Ok(self.recorded.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct FakeCache {
        totals: Mutex<u32>,
        passed: Mutex<u32>,
    }

    #[async_trait]
    impl QuizCache for FakeCache {
        async fn incr_total(&self, _quiz_id: Id, _position: u32) -> Result<(), CacheError> {
            *self.totals.lock().unwrap() += 1;
            Ok(())
        }
        async fn incr_passed(&self, _quiz_id: Id, _position: u32) -> Result<(), CacheError> {
            *self.passed.lock().unwrap() += 1;
            Ok(())
        }
        async fn pass_rate(&self, _quiz_id: Id, _position: u32) -> Result<Option<f64>, CacheError> {
            Ok(None)
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

    fn question() -> Question {
        Question {
            id: Id::generate(),
            quiz_id: Some(Id::generate()),
            text: "2+2?".into(),
            options: vec![
                QuestionOption { text: "3".into() },
                QuestionOption { text: "4".into() },
            ],
            correct_option: 1,
            time_limit_sec: 10,
            point_value: 1,
            difficulty: quiz_models::Difficulty::new(1),
            is_used: false,
        }
    }

    #[tokio::test]
    async fn correct_in_time_answer_is_not_eliminated_and_scores() {
        let cache = FakeCache::default();
        let repo = FakeAnswerRepo::default();
        let question = question();
        let now = Utc::now().timestamp_millis();

        let outcome = process_answer(
            &cache,
            &repo,
            1,
            AnswerContext {
                user_id: Id::generate(),
                quiz_id: Id::generate(),
                question: &question,
                selected_option: 1,
                t_start_ms: now,
            },
        )
        .await
        .unwrap();

        assert!(outcome.is_correct);
        assert!(!outcome.is_eliminated);
        assert_eq!(outcome.points_earned, 1);
        assert_eq!(*cache.totals.lock().unwrap(), 1);
        assert_eq!(*cache.passed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn incorrect_answer_is_eliminated() {
        let cache = FakeCache::default();
        let repo = FakeAnswerRepo::default();
        let question = question();
        let now = Utc::now().timestamp_millis();

        let outcome = process_answer(
            &cache,
            &repo,
            1,
            AnswerContext {
                user_id: Id::generate(),
                quiz_id: Id::generate(),
                question: &question,
                selected_option: 0,
                t_start_ms: now,
            },
        )
        .await
        .unwrap();

        assert!(!outcome.is_correct);
        assert!(outcome.is_eliminated);
        assert_eq!(outcome.elimination_reason, Some(EliminationReason::IncorrectAnswer));
        assert_eq!(outcome.points_earned, 0);
        assert_eq!(*cache.passed.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn overdue_correct_answer_is_eliminated_for_time() {
        let cache = FakeCache::default();
        let repo = FakeAnswerRepo::default();
        let question = question();
        let stale_start = Utc::now().timestamp_millis() - 20_000;

        let outcome = process_answer(
            &cache,
            &repo,
            1,
            AnswerContext {
                user_id: Id::generate(),
                quiz_id: Id::generate(),
                question: &question,
                selected_option: 1,
                t_start_ms: stale_start,
            },
        )
        .await
        .unwrap();

        assert!(outcome.is_correct);
        assert!(outcome.time_limit_exceeded);
        assert!(outcome.is_eliminated);
        assert_eq!(outcome.elimination_reason, Some(EliminationReason::TimeExceeded));
        assert_eq!(outcome.points_earned, 0);
    }
}
