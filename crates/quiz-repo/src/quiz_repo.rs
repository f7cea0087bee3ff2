use async_trait::async_trait;
use quiz_errors::{AppError, ConflictKind};
use quiz_models::{AdSlot, Id, Quiz, QuizStatus};

use crate::PgPool;

#[async_trait]
pub trait QuizRepo: Send + Sync {
    async fn find_by_id(&self, id: Id) -> Result<Option<Quiz>, AppError>;

    /// Every quiz whose `scheduled_time` has not yet passed, in ascending
    /// order, for the scheduler's arm-on-boot pass.
    async fn list_upcoming(&self) -> Result<Vec<Quiz>, AppError>;

    /// The atomic *scheduled -> in_progress* transition of §4.2. A
    /// unique-violation on the storage layer's "one in_progress at a time"
    /// partial index maps to `ConflictKind::AnotherQuizInProgress`; zero
    /// rows affected (quiz missing or not in `scheduled`) maps to
    /// `ConflictKind::QuizNotInExpectedState`.
    async fn start_atomic(&self, id: Id) -> Result<Quiz, AppError>;

    async fn mark_completed(&self, id: Id) -> Result<(), AppError>;
    async fn mark_cancelled(&self, id: Id) -> Result<(), AppError>;

    async fn count_available_pool_questions(&self, min_count: i64) -> Result<i64, AppError>;
    async fn count_embedded_questions(&self, quiz_id: Id) -> Result<i64, AppError>;

    /// The ad slot configured for `position`, if any (§4.4 step 8).
    async fn ad_slot_for_position(&self, quiz_id: Id, position: u32) -> Result<Option<AdSlot>, AppError>;
}

pub struct PgQuizRepo {
    pool: PgPool,
}

impl PgQuizRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuizRepo for PgQuizRepo {
    async fn find_by_id(&self, id: Id) -> Result<Option<Quiz>, AppError> {
        let row = sqlx::query_as!(
            Quiz,
            r#"
            SELECT
                id as "id: Id",
                title,
                description,
                scheduled_time,
                status as "status: QuizStatus",
                question_count,
                prize_fund,
                finish_on_zero_players
            FROM quizzes
            WHERE id = $1
            "#,
            id.as_uuid(),
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_upcoming(&self) -> Result<Vec<Quiz>, AppError> {
        let rows = sqlx::query_as!(
            Quiz,
            r#"
            SELECT
                id as "id: Id",
                title,
                description,
                scheduled_time,
                status as "status: QuizStatus",
                question_count,
                prize_fund,
                finish_on_zero_players
            FROM quizzes
            WHERE status = 'scheduled' AND scheduled_time > now()
            ORDER BY scheduled_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn start_atomic(&self, id: Id) -> Result<Quiz, AppError> {
        let result = sqlx::query_as!(
            Quiz,
            r#"
            UPDATE quizzes
            SET status = 'in_progress'
            WHERE id = $1 AND status = 'scheduled'
            RETURNING
                id as "id: Id",
                title,
                description,
                scheduled_time,
                status as "status: QuizStatus",
                question_count,
                prize_fund,
                finish_on_zero_players
            "#,
            id.as_uuid(),
        )
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(quiz)) => Ok(quiz),
            Ok(None) => Err(AppError::Conflict(ConflictKind::QuizNotInExpectedState)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tracing::warn!(quiz_id = %id, "start_atomic lost the singleton race");
                Err(AppError::Conflict(ConflictKind::AnotherQuizInProgress))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn mark_completed(&self, id: Id) -> Result<(), AppError> {
        sqlx::query!(
            "UPDATE quizzes SET status = 'completed' WHERE id = $1",
            id.as_uuid(),
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_cancelled(&self, id: Id) -> Result<(), AppError> {
        sqlx::query!(
            r#"
            UPDATE quizzes
            SET status = 'cancelled'
            WHERE id = $1 AND status NOT IN ('completed', 'cancelled')
            "#,
            id.as_uuid(),
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_available_pool_questions(&self, _min_count: i64) -> Result<i64, AppError> {
        let count = sqlx::query_scalar!(
            r#"
            SELECT count(*) as "count!"
            FROM questions
            WHERE quiz_id IS NULL AND is_used = false
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_embedded_questions(&self, quiz_id: Id) -> Result<i64, AppError> {
        let count = sqlx::query_scalar!(
            r#"SELECT count(*) as "count!" FROM questions WHERE quiz_id = $1"#,
            quiz_id.as_uuid(),
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn ad_slot_for_position(&self, quiz_id: Id, position: u32) -> Result<Option<AdSlot>, AppError> {
        struct Row {
            quiz_id: Id,
            position: i32,
            media_type: String,
            media_url: String,
            duration_sec: i32,
        }
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                quiz_id as "quiz_id: Id",
                position,
                media_type,
                media_url,
                duration_sec
            FROM ad_slots
            WHERE quiz_id = $1 AND position = $2
            "#,
            quiz_id.as_uuid(),
            position as i32,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| AdSlot {
            quiz_id: row.quiz_id,
            position: row.position,
            media_type: row.media_type,
            media_url: row.media_url,
            duration_sec: row.duration_sec as u32,
        }))
    }
}
