//! Repository traits for every entity in the data model, plus a
//! `sqlx`/Postgres implementation. Follows `crates/automations::server`'s
//! query style (`sqlx::query_as!` with typed column casts) and its
//! `FOR UPDATE SKIP LOCKED` dequeue pattern, adapted here to the
//! single-row guarded UPDATE that drives the atomic quiz start.

pub mod answer_repo;
pub mod auth_repo;
pub mod question_repo;
pub mod quiz_repo;
pub mod result_repo;
pub mod user_repo;

pub use answer_repo::{AnswerRepo, PgAnswerRepo};
pub use auth_repo::{AuthRepo, PgAuthRepo};
pub use question_repo::{PgQuestionRepo, QuestionRepo};
pub use quiz_repo::{PgQuizRepo, QuizRepo};
pub use result_repo::{PgResultRepo, ResultRepo};
pub use user_repo::{PgUserRepo, UserRepo};

pub type PgPool = sqlx::PgPool;
