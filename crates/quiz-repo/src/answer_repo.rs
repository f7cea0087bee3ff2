use async_trait::async_trait;
use quiz_errors::{AppError, ConflictKind};
use quiz_models::{EliminationReason, Id, UserAnswer};

use crate::PgPool;

#[async_trait]
pub trait AnswerRepo: Send + Sync {
    /// Persists an answer. The unique constraint on (user_id, quiz_id,
    /// question_id) is the sole at-most-once guard (§4.6 rule 5); a
    /// unique-violation maps to `ConflictKind::AlreadyAnswered` with no
    /// further side effects.
    async fn record_answer(&self, answer: &UserAnswer) -> Result<(), AppError>;

    async fn list_for_quiz(&self, quiz_id: Id) -> Result<Vec<UserAnswer>, AppError>;
}

pub struct PgAnswerRepo {
    pool: PgPool,
}

impl PgAnswerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnswerRepo for PgAnswerRepo {
    async fn record_answer(&self, answer: &UserAnswer) -> Result<(), AppError> {
        let result = sqlx::query!(
            r#"
            INSERT INTO user_answers (
                user_id, quiz_id, question_id, selected_option, is_correct,
                response_time_ms, score, is_eliminated, elimination_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
            answer.user_id.as_uuid(),
            answer.quiz_id.as_uuid(),
            answer.question_id.as_uuid(),
            answer.selected_option.map(|o| o as i16),
            answer.is_correct,
            answer.response_time_ms,
            answer.score,
            answer.is_eliminated,
            answer.elimination_reason as Option<EliminationReason>,
        )
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::Conflict(ConflictKind::AlreadyAnswered))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_for_quiz(&self, quiz_id: Id) -> Result<Vec<UserAnswer>, AppError> {
        struct Row {
            user_id: Id,
            quiz_id: Id,
            question_id: Id,
            selected_option: Option<i16>,
            is_correct: bool,
            response_time_ms: i64,
            score: i64,
            is_eliminated: bool,
            elimination_reason: Option<EliminationReason>,
        }

        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                user_id as "user_id: Id",
                quiz_id as "quiz_id: Id",
                question_id as "question_id: Id",
                selected_option,
                is_correct,
                response_time_ms,
                score,
                is_eliminated,
                elimination_reason as "elimination_reason: EliminationReason"
            FROM user_answers
            WHERE quiz_id = $1
            "#,
            quiz_id.as_uuid(),
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UserAnswer {
                user_id: row.user_id,
                quiz_id: row.quiz_id,
                question_id: row.question_id,
                selected_option: row.selected_option.map(|o| o as u8),
                is_correct: row.is_correct,
                response_time_ms: row.response_time_ms,
                score: row.score,
                is_eliminated: row.is_eliminated,
                elimination_reason: row.elimination_reason,
            })
            .collect())
    }
}
