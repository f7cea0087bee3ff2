use async_trait::async_trait;
use quiz_errors::AppError;
use quiz_models::{Difficulty, Id, Question, QuestionOption};

use crate::PgPool;

/// Row shape returned by the candidate queries; `quiz-selector` composes
/// these primitives into the hybrid-source-then-fallback-scan algorithm of
/// §4.5, so this trait only exposes single-difficulty, single-source lookups.
#[async_trait]
pub trait QuestionRepo: Send + Sync {
    async fn find_by_id(&self, id: Id) -> Result<Option<Question>, AppError>;

    /// A random unused question belonging to `quiz_id` at exactly `difficulty`.
    async fn random_unused_quiz_question(
        &self,
        quiz_id: Id,
        difficulty: Difficulty,
        exclude: &[Id],
    ) -> Result<Option<Question>, AppError>;

    /// A random unused pool question (`quiz_id IS NULL`) at exactly `difficulty`.
    async fn random_unused_pool_question(
        &self,
        difficulty: Difficulty,
        exclude: &[Id],
    ) -> Result<Option<Question>, AppError>;

    /// Marks every question used in a run as `is_used = true` in one
    /// statement, at the end of the quiz (§4.5: "not per pick, so that
    /// concurrent ranking is unaffected").
    async fn mark_used_batch(&self, ids: &[Id]) -> Result<(), AppError>;
}

pub struct PgQuestionRepo {
    pool: PgPool,
}

impl PgQuestionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct QuestionRow {
    id: Id,
    quiz_id: Option<Id>,
    text: String,
    options: serde_json::Value,
    correct_option: i16,
    time_limit_sec: i32,
    point_value: i32,
    difficulty: Difficulty,
    is_used: bool,
}

impl TryFrom<QuestionRow> for Question {
    type Error = AppError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        let options: Vec<QuestionOption> = serde_json::from_value(row.options)
            .map_err(|err| AppError::Internal(anyhow::anyhow!("malformed options column: {err}")))?;
        Ok(Question {
            id: row.id,
            quiz_id: row.quiz_id,
            text: row.text,
            options,
            correct_option: row.correct_option as u8,
            time_limit_sec: row.time_limit_sec as u32,
            point_value: row.point_value,
            difficulty: row.difficulty,
            is_used: row.is_used,
        })
    }
}

#[async_trait]
impl QuestionRepo for PgQuestionRepo {
    async fn find_by_id(&self, id: Id) -> Result<Option<Question>, AppError> {
        let row = sqlx::query_as!(
            QuestionRow,
            r#"
            SELECT
                id as "id: Id",
                quiz_id as "quiz_id: Id",
                text,
                options,
                correct_option,
                time_limit_sec,
                point_value,
                difficulty as "difficulty: Difficulty",
                is_used
            FROM questions
            WHERE id = $1
            "#,
            id.as_uuid(),
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Question::try_from).transpose()
    }

    async fn random_unused_quiz_question(
        &self,
        quiz_id: Id,
        difficulty: Difficulty,
        exclude: &[Id],
    ) -> Result<Option<Question>, AppError> {
        let exclude_uuids: Vec<uuid::Uuid> = exclude.iter().map(|id| id.as_uuid()).collect();
        let row = sqlx::query_as!(
            QuestionRow,
            r#"
            SELECT
                id as "id: Id",
                quiz_id as "quiz_id: Id",
                text,
                options,
                correct_option,
                time_limit_sec,
                point_value,
                difficulty as "difficulty: Difficulty",
                is_used
            FROM questions
            WHERE quiz_id = $1
              AND is_used = false
              AND difficulty = $2
              AND NOT (id = ANY($3))
            ORDER BY random()
            LIMIT 1
            "#,
            quiz_id.as_uuid(),
            difficulty.get(),
            &exclude_uuids,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Question::try_from).transpose()
    }

    async fn random_unused_pool_question(
        &self,
        difficulty: Difficulty,
        exclude: &[Id],
    ) -> Result<Option<Question>, AppError> {
        let exclude_uuids: Vec<uuid::Uuid> = exclude.iter().map(|id| id.as_uuid()).collect();
        let row = sqlx::query_as!(
            QuestionRow,
            r#"
            SELECT
                id as "id: Id",
                quiz_id as "quiz_id: Id",
                text,
                options,
                correct_option,
                time_limit_sec,
                point_value,
                difficulty as "difficulty: Difficulty",
                is_used
            FROM questions
            WHERE quiz_id IS NULL
              AND is_used = false
              AND difficulty = $1
              AND NOT (id = ANY($2))
            ORDER BY random()
            LIMIT 1
            "#,
            difficulty.get(),
            &exclude_uuids,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Question::try_from).transpose()
    }

    async fn mark_used_batch(&self, ids: &[Id]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let uuids: Vec<uuid::Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        sqlx::query!(
            "UPDATE questions SET is_used = true WHERE id = ANY($1)",
            &uuids,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
