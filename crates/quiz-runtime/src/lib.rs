//! The live orchestration core: §4.2's pre-game scheduler, §4.3's
//! single-active-quiz coordinator, §4.4's per-question loop, §4.5's
//! adaptive selector (in `quiz-selector`, a sibling crate), §4.6's answer
//! processor, and §4.7's result finalizer. Built leaves-first on top of
//! `quiz-cache`, `quiz-repo`, and `quiz-fabric`.

pub mod answer_processor;
pub mod coordinator;
pub mod finalizer;
pub mod question_loop;
pub mod scheduler;
pub mod state;

pub use coordinator::{Coordinator, RuntimeDeps};
pub use scheduler::Scheduler;
pub use state::ActiveQuizState;
