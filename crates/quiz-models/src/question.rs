use crate::Id;

/// Difficulty is clamped to [1,5] everywhere it's produced; the selector and
/// the repository layer both rely on that invariant rather than re-checking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct Difficulty(i16);

impl Difficulty {
    pub const MIN: Difficulty = Difficulty(1);
    pub const MAX: Difficulty = Difficulty(5);

    pub fn new(value: i16) -> Self {
        Self(value.clamp(Self::MIN.0, Self::MAX.0))
    }

    pub fn get(self) -> i16 {
        self.0
    }

    pub fn bump(self, delta: i16) -> Self {
        Self::new(self.0 + delta)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuestionOption {
    pub text: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub id: Id,
    /// NULL means this question belongs to the shared pool.
    pub quiz_id: Option<Id>,
    pub text: String,
    pub options: Vec<QuestionOption>,
    pub correct_option: u8,
    pub time_limit_sec: u32,
    pub point_value: i32,
    pub difficulty: Difficulty,
    pub is_used: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum QuestionValidationError {
    #[error("question must have between 2 and 5 options, got {0}")]
    OptionCount(usize),
    #[error("correct_option {correct} is out of bounds for {len} options")]
    CorrectOptionOutOfBounds { correct: u8, len: usize },
    #[error("time_limit_sec {0} is out of the allowed [5,60] range")]
    TimeLimitOutOfRange(u32),
}

impl Question {
    pub fn validate(&self) -> Result<(), QuestionValidationError> {
        if !(2..=5).contains(&self.options.len()) {
            return Err(QuestionValidationError::OptionCount(self.options.len()));
        }
        if self.correct_option as usize >= self.options.len() {
            return Err(QuestionValidationError::CorrectOptionOutOfBounds {
                correct: self.correct_option,
                len: self.options.len(),
            });
        }
        if !(5..=60).contains(&self.time_limit_sec) {
            return Err(QuestionValidationError::TimeLimitOutOfRange(
                self.time_limit_sec,
            ));
        }
        Ok(())
    }

    pub fn is_pool_question(&self) -> bool {
        self.quiz_id.is_none()
    }

    /// A reveal-safe view of this question that omits `correct_option`,
    /// for `quiz:question` broadcasts and `/:id/with-questions` while a
    /// quiz has not completed.
    pub fn without_answer(&self) -> QuestionPublic {
        QuestionPublic {
            id: self.id,
            text: self.text.clone(),
            options: self.options.clone(),
            time_limit_sec: self.time_limit_sec,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QuestionPublic {
    pub id: Id,
    pub text: String,
    pub options: Vec<QuestionOption>,
    pub time_limit_sec: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(options: usize, correct: u8) -> Question {
        Question {
            id: Id::generate(),
            quiz_id: Some(Id::generate()),
            text: "2+2?".into(),
            options: (0..options)
                .map(|i| QuestionOption {
                    text: i.to_string(),
                })
                .collect(),
            correct_option: correct,
            time_limit_sec: 15,
            point_value: 1,
            difficulty: Difficulty::new(3),
            is_used: false,
        }
    }

    #[test]
    fn rejects_too_few_options() {
        assert!(matches!(
            question(1, 0).validate(),
            Err(QuestionValidationError::OptionCount(1))
        ));
    }

    #[test]
    fn rejects_correct_option_out_of_bounds() {
        assert!(matches!(
            question(3, 5).validate(),
            Err(QuestionValidationError::CorrectOptionOutOfBounds { .. })
        ));
    }

    #[test]
    fn accepts_well_formed_question() {
        assert!(question(4, 2).validate().is_ok());
    }

    #[test]
    fn difficulty_clamps_to_range() {
        assert_eq!(Difficulty::new(0).get(), 1);
        assert_eq!(Difficulty::new(9).get(), 5);
        assert_eq!(Difficulty::new(3).bump(10).get(), 5);
        assert_eq!(Difficulty::new(3).bump(-10).get(), 1);
    }
}
