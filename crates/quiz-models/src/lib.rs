pub mod ad_slot;
pub mod auth;
pub mod events;
pub mod id;
pub mod question;
pub mod quiz;
pub mod result;
pub mod user;

pub use ad_slot::AdSlot;
pub use id::Id;
pub use question::{Difficulty, Question, QuestionOption, QuestionPublic, QuestionValidationError};
pub use quiz::{Quiz, QuizStatus};
pub use result::{EliminationReason, QuizResult, UserAnswer};
pub use user::User;
pub use auth::{InvalidationMark, JwtKey, RefreshToken};
