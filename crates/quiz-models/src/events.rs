//! The WebSocket wire envelope: `{type, data}` inbound and outbound, shared
//! between `quiz-fabric` (which routes them) and `quiz-runtime` (which emits
//! most of the outbound variants).

use crate::{question::QuestionPublic, result::EliminationReason, Id};

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum InboundMessage {
    #[serde(rename = "user:ready")]
    UserReady { quiz_id: Id },
    #[serde(rename = "user:answer")]
    UserAnswer {
        question_id: Id,
        selected_option: u8,
        /// Client-reported timestamp; advisory only, never trusted for timing.
        timestamp: i64,
    },
    #[serde(rename = "user:heartbeat")]
    UserHeartbeat,
    #[serde(rename = "user:resync")]
    UserResync { quiz_id: Id },
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OutboundMessage {
    #[serde(rename = "quiz:start")]
    QuizStart { quiz_id: Id },
    #[serde(rename = "quiz:announcement")]
    QuizAnnouncement { quiz_id: Id, starts_at: chrono::DateTime<chrono::Utc> },
    #[serde(rename = "quiz:player_count")]
    QuizPlayerCount { quiz_id: Id, count: usize },
    #[serde(rename = "quiz:user_ready")]
    QuizUserReady { quiz_id: Id, user_id: Id },
    #[serde(rename = "quiz:question")]
    QuizQuestion {
        quiz_id: Id,
        position: u32,
        question: QuestionPublic,
        server_timestamp: i64,
        time_limit: u32,
    },
    #[serde(rename = "quiz:timer")]
    QuizTimer { quiz_id: Id, remaining_sec: u32 },
    #[serde(rename = "quiz:elimination")]
    QuizElimination {
        quiz_id: Id,
        reason: EliminationReason,
        eliminated_on_question: i32,
    },
    #[serde(rename = "quiz:answer_reveal")]
    QuizAnswerReveal { quiz_id: Id, correct_option: u8 },
    #[serde(rename = "quiz:answer_result")]
    QuizAnswerResult {
        quiz_id: Id,
        correct_option: u8,
        your_answer: u8,
        is_correct: bool,
        points_earned: i64,
        time_taken_ms: i64,
        is_eliminated: bool,
        elimination_reason: Option<EliminationReason>,
        time_limit_exceeded: bool,
    },
    #[serde(rename = "quiz:ad_break")]
    QuizAdBreak {
        quiz_id: Id,
        media_type: String,
        media_url: String,
        duration_sec: u32,
    },
    #[serde(rename = "quiz:ad_break_end")]
    QuizAdBreakEnd { quiz_id: Id },
    #[serde(rename = "quiz:finish")]
    QuizFinish { quiz_id: Id },
    #[serde(rename = "quiz:results_available")]
    QuizResultsAvailable { quiz_id: Id },
    #[serde(rename = "quiz:state")]
    QuizState {
        quiz_id: Id,
        question: Option<QuestionPublic>,
        position: u32,
        remaining_sec: u32,
        is_eliminated: bool,
        score: i64,
        correct_count: i32,
    },
    #[serde(rename = "server:heartbeat")]
    ServerHeartbeat,
    #[serde(rename = "server:error")]
    ServerError { code: String, message: String },
    #[serde(rename = "TOKEN_EXPIRE_SOON")]
    TokenExpireSoon { seconds_remaining: i64 },
    #[serde(rename = "TOKEN_EXPIRED")]
    TokenExpired,
}
