use crate::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "elimination_reason", rename_all = "snake_case")
)]
pub enum EliminationReason {
    IncorrectAnswer,
    TimeExceeded,
    NoAnswerTimeout,
}

/// One row per (user, quiz), created once at finalization.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuizResult {
    pub user_id: Id,
    pub quiz_id: Id,
    pub score: i64,
    pub correct_answers: i32,
    pub rank: i64,
    pub is_winner: bool,
    /// Prize awarded to this participant, in minor currency units.
    pub prize_fund: i64,
    pub is_eliminated: bool,
    pub elimination_reason: Option<EliminationReason>,
    pub eliminated_on_question: Option<i32>,
}

/// Append-only; the (user_id, quiz_id, question_id) unique index is the
/// at-most-once admission guard described in §4.6.
///
/// `selected_option` is `None` for the one case where a row is inserted
/// without the user ever answering: the elimination sweep's
/// `no_answer_timeout` row, which gives result finalization something to
/// carry elimination details over from even when nothing was submitted.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserAnswer {
    pub user_id: Id,
    pub quiz_id: Id,
    pub question_id: Id,
    pub selected_option: Option<u8>,
    pub is_correct: bool,
    pub response_time_ms: i64,
    pub score: i64,
    pub is_eliminated: bool,
    pub elimination_reason: Option<EliminationReason>,
}
