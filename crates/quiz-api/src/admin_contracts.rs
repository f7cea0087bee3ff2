//! Request/response DTOs for the admin HTTP surface of §6 — quiz CRUD,
//! scheduling, cancellation, duplication, and the results export — that
//! this workspace models as contracts only. No router or validation
//! middleware is wired up for them: per §1's explicit scope, HTTP
//! routing/validation is an external collaborator, and these admin routes
//! sit entirely on the "quiz CRUD" side of that boundary rather than the
//! token/WS surface this crate actually serves. A full admin service can
//! depend on `quiz-repo` directly and reuse these shapes for its wire
//! format.

use chrono::{DateTime, Utc};
use quiz_models::Id;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateQuizRequest {
    pub title: String,
    pub description: Option<String>,
    pub scheduled_time: DateTime<Utc>,
    pub question_count: i32,
    pub prize_fund: i64,
    #[serde(default)]
    pub finish_on_zero_players: bool,
}

#[derive(Debug, Serialize)]
pub struct QuizResponse {
    pub id: Id,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_time: DateTime<Utc>,
    pub status: quiz_models::QuizStatus,
    pub question_count: i32,
    pub prize_fund: i64,
    pub finish_on_zero_players: bool,
}

impl From<quiz_models::Quiz> for QuizResponse {
    fn from(quiz: quiz_models::Quiz) -> Self {
        Self {
            id: quiz.id,
            title: quiz.title,
            description: quiz.description,
            scheduled_time: quiz.scheduled_time,
            status: quiz.status,
            question_count: quiz.question_count,
            prize_fund: quiz.prize_fund,
            finish_on_zero_players: quiz.finish_on_zero_players,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AppendQuestionsRequest {
    pub questions: Vec<NewQuestion>,
}

#[derive(Debug, Deserialize)]
pub struct NewQuestion {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: u8,
    pub time_limit_sec: u32,
    pub point_value: i32,
    pub difficulty: i16,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuizRequest {
    pub scheduled_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct DuplicateQuizRequest {
    pub scheduled_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct QuizWithQuestionsResponse {
    pub quiz: QuizResponse,
    pub questions: Vec<QuestionSummary>,
}

/// `correct_option` is deliberately absent — §6: "`correct_option` is
/// omitted from `/:id/with-questions` when status != completed". Callers
/// that need it fetch `/:id/results` once the quiz is over.
#[derive(Debug, Serialize)]
pub struct QuestionSummary {
    pub id: Id,
    pub text: String,
    pub options: Vec<String>,
    pub time_limit_sec: u32,
    pub point_value: i32,
    pub difficulty: i16,
}

#[derive(Debug, Serialize)]
pub struct ResultRow {
    pub user_id: Id,
    pub username: String,
    pub score: i64,
    pub correct_answers: i32,
    pub rank: i32,
    pub is_winner: bool,
    pub prize_fund: i64,
    pub is_eliminated: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResultsExportQuery {
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Xlsx,
}
