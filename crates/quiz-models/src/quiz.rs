use crate::Id;

/// Status transitions: created -> scheduled -> in_progress -> completed;
/// any non-terminal status -> cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "quiz_status", rename_all = "snake_case"))]
pub enum QuizStatus {
    Created,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl QuizStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QuizStatus::Completed | QuizStatus::Cancelled)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Quiz {
    pub id: Id,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_time: chrono::DateTime<chrono::Utc>,
    pub status: QuizStatus,
    pub question_count: i32,
    /// Prize fund, in integer minor currency units (cents).
    pub prize_fund: i64,
    pub finish_on_zero_players: bool,
}

impl Quiz {
    /// Whether this quiz may legally transition to `in_progress`.
    pub fn is_startable(&self) -> bool {
        self.status == QuizStatus::Scheduled
    }
}
