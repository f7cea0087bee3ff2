use quiz_models::{Id, Question, Quiz};

/// The in-memory runtime state of §3 "Quiz runtime state": current
/// question, current position, monotonic question-start timestamp, and
/// the ids used so far in this run. Owned exclusively by the active
/// quiz's question loop for its lifetime; the coordinator's lock is the
/// only thing standing between this and a torn read from the answer path.
#[derive(Debug, Clone)]
pub struct ActiveQuizState {
    pub quiz: Quiz,
    pub current_question: Option<Question>,
    /// 1-based; 0 before the first question has been broadcast.
    pub position: u32,
    pub question_start_ms: i64,
    pub used_question_ids: Vec<Id>,
}

impl ActiveQuizState {
    pub fn new(quiz: Quiz) -> Self {
        Self {
            quiz,
            current_question: None,
            position: 0,
            question_start_ms: 0,
            used_question_ids: Vec::new(),
        }
    }

    pub fn time_limit_sec(&self) -> u32 {
        self.current_question
            .as_ref()
            .map(|q| q.time_limit_sec)
            .unwrap_or(0)
    }
}
