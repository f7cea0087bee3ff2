use async_trait::async_trait;
use quiz_errors::AppError;
use quiz_models::Id;

use crate::PgPool;

/// Tallies handed in from the quiz runtime's participant set and the
/// question count it actually ran (which may be less than `Quiz::question_count`
/// if `finish_on_zero_players` ended the loop early).
pub struct FinalizationInput {
    pub quiz_id: Id,
    pub participants: Vec<Id>,
    pub questions_run: i32,
}

pub struct FinalizationSummary {
    pub winner_ids: Vec<Id>,
    pub prize_per_winner: i64,
}

#[async_trait]
pub trait ResultRepo: Send + Sync {
    /// Runs the whole of §4.7 in one transaction: ensures a `Result` row
    /// per participant, ranks, marks winners, splits the prize fund, and
    /// updates the winners' user aggregates. Idempotent — re-running it
    /// for an already-finalized quiz recomputes the same rows from the
    /// same `user_answers`, so a crash mid-finalization is safe to retry.
    async fn finalize_quiz(
        &self,
        input: FinalizationInput,
        prize_fund: i64,
    ) -> Result<FinalizationSummary, AppError>;
}

pub struct PgResultRepo {
    pool: PgPool,
}

impl PgResultRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultRepo for PgResultRepo {
    async fn finalize_quiz(
        &self,
        input: FinalizationInput,
        prize_fund: i64,
    ) -> Result<FinalizationSummary, AppError> {
        let mut tx = self.pool.begin().await?;
        let quiz_id = input.quiz_id.as_uuid();
        let participant_ids: Vec<uuid::Uuid> =
            input.participants.iter().map(|id| id.as_uuid()).collect();

        // Step 1: one Result row per participant, aggregated from their
        // recorded answers. A participant with zero answers still gets a
        // row (score 0, eliminated by the sweep's no_answer_timeout rows).
        sqlx::query!(
            r#"
            INSERT INTO results (user_id, quiz_id, score, correct_answers, rank,
                                  is_winner, prize_fund, is_eliminated,
                                  elimination_reason, eliminated_on_question)
            SELECT
                u.user_id,
                $1,
                COALESCE(a.score, 0),
                COALESCE(a.correct_answers, 0),
                0,
                false,
                0,
                COALESCE(a.is_eliminated, false),
                a.elimination_reason,
                a.eliminated_on_question
            FROM unnest($2::uuid[]) AS u(user_id)
            LEFT JOIN (
                SELECT
                    user_id,
                    sum(score) AS score,
                    count(*) FILTER (WHERE is_correct) AS correct_answers,
                    bool_or(is_eliminated) AS is_eliminated,
                    (array_agg(elimination_reason ORDER BY question_id) FILTER (WHERE is_eliminated))[1]
                        AS elimination_reason,
                    (array_agg(row_number() OVER (PARTITION BY user_id ORDER BY question_id))
                        FILTER (WHERE is_eliminated))[1] AS eliminated_on_question
                FROM user_answers
                WHERE quiz_id = $1
                GROUP BY user_id
            ) AS a ON a.user_id = u.user_id
            ON CONFLICT (user_id, quiz_id) DO UPDATE SET
                score = EXCLUDED.score,
                correct_answers = EXCLUDED.correct_answers,
                is_eliminated = EXCLUDED.is_eliminated,
                elimination_reason = EXCLUDED.elimination_reason,
                eliminated_on_question = EXCLUDED.eliminated_on_question
            "#,
            quiz_id,
            &participant_ids,
        )
        .execute(&mut *tx)
        .await?;

        // Step 2: ranks.
        sqlx::query!(
            r#"
            WITH ranked AS (
                SELECT user_id, RANK() OVER (ORDER BY score DESC, correct_answers DESC) AS rnk
                FROM results
                WHERE quiz_id = $1
            )
            UPDATE results
            SET rank = ranked.rnk
            FROM ranked
            WHERE results.quiz_id = $1 AND results.user_id = ranked.user_id
            "#,
            quiz_id,
        )
        .execute(&mut *tx)
        .await?;

        // Step 3: winners = finished all questions, never eliminated.
        let winner_ids: Vec<uuid::Uuid> = sqlx::query_scalar!(
            r#"
            SELECT user_id
            FROM results
            WHERE quiz_id = $1 AND correct_answers = $2 AND is_eliminated = false
            "#,
            quiz_id,
            input.questions_run,
        )
        .fetch_all(&mut *tx)
        .await?;

        // Step 4: prize split. Integer division is the point (§4.7).
        let prize_per_winner = if winner_ids.is_empty() {
            0
        } else {
            prize_fund / winner_ids.len() as i64
        };

        if winner_ids.is_empty() {
            sqlx::query!(
                "UPDATE results SET is_winner = false, prize_fund = 0 WHERE quiz_id = $1",
                quiz_id,
            )
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query!(
                r#"
                UPDATE results
                SET is_winner = true, prize_fund = $2
                WHERE quiz_id = $1 AND user_id = ANY($3)
                "#,
                quiz_id,
                prize_per_winner,
                &winner_ids,
            )
            .execute(&mut *tx)
            .await?;

            // Guarded NOT IN: winner_ids is non-empty here, so this never
            // degenerates into `NOT IN ()` over the whole quiz (§4.7 rule 4).
            sqlx::query!(
                r#"
                UPDATE results
                SET is_winner = false, prize_fund = 0
                WHERE quiz_id = $1 AND NOT (user_id = ANY($2))
                "#,
                quiz_id,
                &winner_ids,
            )
            .execute(&mut *tx)
            .await?;

            // Step 5: winners' aggregates, same transaction.
            sqlx::query!(
                r#"
                UPDATE users
                SET wins_count = wins_count + 1,
                    total_prize_won = total_prize_won + $2,
                    games_played = games_played + 1
                WHERE id = ANY($1)
                "#,
                &winner_ids,
                prize_per_winner,
            )
            .execute(&mut *tx)
            .await?;
        }

        // Every other participant still had a game played.
        sqlx::query!(
            r#"
            UPDATE users
            SET games_played = games_played + 1
            WHERE id = ANY($1) AND NOT (id = ANY($2))
            "#,
            &participant_ids,
            &winner_ids,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(FinalizationSummary {
            winner_ids: winner_ids.into_iter().map(Id::from).collect(),
            prize_per_winner,
        })
    }
}
