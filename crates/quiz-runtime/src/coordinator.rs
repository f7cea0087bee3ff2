use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use quiz_cache::QuizCache;
use quiz_config::{DifficultySettings, QuizSettings, SchedulingSettings};
use quiz_errors::{AppError, ConflictKind};
use quiz_fabric::Hub;
use quiz_models::{events::OutboundMessage, EliminationReason, Id, Quiz};
use quiz_repo::{AnswerRepo, QuestionRepo, QuizRepo, ResultRepo};
use tokio_util::sync::CancellationToken;

use crate::answer_processor::{self, AnswerContext};
use crate::finalizer;
use crate::question_loop;
use crate::state::ActiveQuizState;

/// Bundle of the runtime's persistence and fan-out collaborators, shared
/// by the coordinator, the question loop, and the answer processor.
/// Trait objects rather than a generic parameter per collaborator — with
/// five independent traits plus the fabric, a generic `Coordinator<QZ,
/// QS, AN, RS>` would spread across every call site for no benefit, so
/// this follows the `Arc<dyn Backplane>` precedent the fabric already
/// set rather than `quiz-auth::AuthManager`'s type-parameter shape.
pub struct RuntimeDeps {
    pub quiz_repo: Arc<dyn QuizRepo>,
    pub question_repo: Arc<dyn QuestionRepo>,
    pub answer_repo: Arc<dyn AnswerRepo>,
    pub result_repo: Arc<dyn ResultRepo>,
    pub cache: Arc<dyn QuizCache>,
    pub hub: Arc<Hub>,
    pub scheduling: SchedulingSettings,
    pub quiz: QuizSettings,
    pub difficulty: DifficultySettings,
}

/// §4.3: owns the single in-memory `ActiveQuizState`. Exactly one quiz
/// may be active at a time; `generation` is bumped on every successful
/// start so a question-loop task that is still unwinding from a prior,
/// already-finalized run can recognize it is stale.
pub struct Coordinator {
    deps: Arc<RuntimeDeps>,
    state: RwLock<Option<ActiveQuizState>>,
    generation: AtomicU64,
    cancellation: RwLock<Option<CancellationToken>>,
}

impl Coordinator {
    pub fn new(deps: RuntimeDeps) -> Arc<Self> {
        Arc::new(Self {
            deps: Arc::new(deps),
            state: RwLock::new(None),
            generation: AtomicU64::new(0),
            cancellation: RwLock::new(None),
        })
    }

    pub fn is_active(&self) -> bool {
        self.state.read().unwrap().is_some()
    }

    pub fn current_quiz_id(&self) -> Option<Id> {
        self.state.read().unwrap().as_ref().map(|s| s.quiz.id)
    }

    /// §4.3: validates question availability, performs the atomic
    /// scheduled→in_progress transition, constructs `ActiveQuizState`,
    /// and spawns the question loop. Rejects a concurrent start with
    /// `AnotherQuizInProgress` before ever touching the database.
    pub async fn try_start_quiz(self: &Arc<Self>, quiz_id: Id) -> Result<(), AppError> {
        if self.is_active() {
            return Err(AppError::Conflict(ConflictKind::AnotherQuizInProgress));
        }

        let quiz = self.deps.quiz_repo.start_atomic(quiz_id).await?;
        if let Err(err) = self.ensure_questions_available(&quiz).await {
            // The DB transition already committed; best-effort revert so the
            // quiz doesn't stay wedged in in_progress with nothing to run.
            let _ = self.deps.quiz_repo.mark_cancelled(quiz.id).await;
            return Err(err);
        }

        {
            let mut state = self.state.write().unwrap();
            if state.is_some() {
                return Err(AppError::Conflict(ConflictKind::AnotherQuizInProgress));
            }
            *state = Some(ActiveQuizState::new(quiz.clone()));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *self.cancellation.write().unwrap() = Some(token.clone());

        self.deps
            .hub
            .broadcast_to_quiz(quiz.id, OutboundMessage::QuizStart { quiz_id: quiz.id })
            .await;

        let coordinator = self.clone();
        let spawned_quiz = quiz.clone();
        tokio::spawn(async move {
            question_loop::run(coordinator, spawned_quiz, generation, token).await;
        });

        Ok(())
    }

    async fn ensure_questions_available(&self, quiz: &Quiz) -> Result<(), AppError> {
        let embedded = self.deps.quiz_repo.count_embedded_questions(quiz.id).await?;
        if embedded >= quiz.question_count as i64 {
            return Ok(());
        }
        let needed = self.deps.quiz.max_questions_per_quiz as i64;
        let available = self.deps.quiz_repo.count_available_pool_questions(needed).await?;
        if available < needed {
            return Err(AppError::Validation(format!(
                "quiz {} has neither enough embedded questions nor enough pool questions to run",
                quiz.id
            )));
        }
        Ok(())
    }

    /// Records a `user:ready` ack: adds the user to the durable
    /// participants set and broadcasts the updated ready/player-count
    /// events.
    pub async fn mark_ready(&self, user_id: Id) -> Result<(), AppError> {
        let quiz_id = self
            .current_quiz_id()
            .ok_or_else(|| AppError::Validation("no active quiz to ready into".to_string()))?;

        self.deps
            .cache
            .add_participant(quiz_id, user_id)
            .await
            .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?;

        self.deps
            .hub
            .broadcast_to_quiz(quiz_id, OutboundMessage::QuizUserReady { quiz_id, user_id })
            .await;

        let count = self
            .deps
            .cache
            .participants(quiz_id)
            .await
            .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?
            .len();
        self.deps
            .hub
            .broadcast_to_quiz(quiz_id, OutboundMessage::QuizPlayerCount { quiz_id, count })
            .await;

        Ok(())
    }

    /// §4.6 rules 1-2 plus the processor call: rejects stale/mismatched
    /// answers against the locked state, then hands off to
    /// `answer_processor::process_answer` and emits the private
    /// `quiz:answer_result` (and `quiz:elimination`, if applicable).
    pub async fn submit_answer(
        &self,
        user_id: Id,
        question_id: Id,
        selected_option: u8,
    ) -> Result<(), AppError> {
        let (quiz_id, question, position, t_start_ms) = {
            let guard = self.state.read().unwrap();
            let state = guard
                .as_ref()
                .ok_or_else(|| AppError::Validation("stale answer: no active quiz".to_string()))?;
            let question = state
                .current_question
                .clone()
                .filter(|q| q.id == question_id)
                .ok_or_else(|| AppError::Validation("stale answer: question mismatch".to_string()))?;
            (state.quiz.id, question, state.position, state.question_start_ms)
        };

        if self
            .deps
            .cache
            .is_eliminated(quiz_id, user_id)
            .await
            .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?
        {
            // The cache only tracks elimination as a boolean; the original
            // reason isn't recoverable here, so the reminder reuses
            // `IncorrectAnswer` as the stable default rather than invent a
            // "reminder" variant.
            self.deps
                .hub
                .send_to_user(
                    user_id,
                    OutboundMessage::QuizElimination {
                        quiz_id,
                        reason: EliminationReason::IncorrectAnswer,
                        eliminated_on_question: position as i32,
                    },
                )
                .await;
            return Err(AppError::Conflict(ConflictKind::AlreadyAnswered));
        }

        let outcome = answer_processor::process_answer(
            self.deps.cache.as_ref(),
            self.deps.answer_repo.as_ref(),
            position,
            AnswerContext {
                user_id,
                quiz_id,
                question: &question,
                selected_option,
                t_start_ms,
            },
        )
        .await?;

        if outcome.is_eliminated {
            self.deps
                .hub
                .send_to_user(
                    user_id,
                    OutboundMessage::QuizElimination {
                        quiz_id,
                        reason: outcome
                            .elimination_reason
                            .unwrap_or(EliminationReason::IncorrectAnswer),
                        eliminated_on_question: position as i32,
                    },
                )
                .await;
        }

        self.deps
            .hub
            .send_to_user(
                user_id,
                OutboundMessage::QuizAnswerResult {
                    quiz_id,
                    correct_option: question.correct_option,
                    your_answer: selected_option,
                    is_correct: outcome.is_correct,
                    points_earned: outcome.points_earned,
                    time_taken_ms: outcome.response_time_ms,
                    is_eliminated: outcome.is_eliminated,
                    elimination_reason: outcome.elimination_reason,
                    time_limit_exceeded: outcome.time_limit_exceeded,
                },
            )
            .await;

        Ok(())
    }

    /// Builds a `quiz:state` snapshot for a reconnecting client: current
    /// question (answer omitted), position, remaining seconds, and this
    /// user's elimination/score status — the reconnect-resync path of §8.
    pub async fn resync_snapshot(
        &self,
        user_id: Id,
        now_ms: i64,
    ) -> Result<Option<OutboundMessage>, AppError> {
        let Some(state) = self.read_state() else {
            return Ok(None);
        };

        let is_eliminated = self
            .deps
            .cache
            .is_eliminated(state.quiz.id, user_id)
            .await
            .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?;

        let answers = self.deps.answer_repo.list_for_quiz(state.quiz.id).await?;
        let (score, correct_count) = answers
            .iter()
            .filter(|answer| answer.user_id == user_id)
            .fold((0i64, 0i32), |(score, correct), answer| {
                (score + answer.score, correct + answer.is_correct as i32)
            });

        let time_limit = state.time_limit_sec();
        let elapsed_ms = (now_ms - state.question_start_ms).max(0);
        let remaining_sec = if time_limit == 0 {
            0
        } else {
            ((time_limit as i64 * 1000 - elapsed_ms).max(0) / 1000) as u32
        };

        Ok(Some(OutboundMessage::QuizState {
            quiz_id: state.quiz.id,
            question: state.current_question.as_ref().map(|q| q.without_answer()),
            position: state.position,
            remaining_sec,
            is_eliminated,
            score,
            correct_count,
        }))
    }

    /// Called by the question loop once it completes (or is cancelled).
    /// Runs finalization and clears the slot so a new quiz may start. A
    /// no-op if this generation has already been superseded.
    pub(crate) async fn finish(&self, generation: u64) {
        if generation != self.generation.load(Ordering::SeqCst) {
            return;
        }
        let Some(state) = self.read_state() else {
            return;
        };

        if let Err(err) = finalizer::finalize(&self.deps, &state).await {
            tracing::error!(
                quiz_id = %state.quiz.id,
                ?err,
                "result finalization failed; quiz remains in_progress for retry"
            );
            return;
        }

        *self.state.write().unwrap() = None;
        *self.cancellation.write().unwrap() = None;
    }

    pub(crate) fn deps(&self) -> Arc<RuntimeDeps> {
        self.deps.clone()
    }

    pub(crate) fn read_state(&self) -> Option<ActiveQuizState> {
        self.state.read().unwrap().clone()
    }

    pub(crate) fn with_write_state<R>(&self, f: impl FnOnce(&mut ActiveQuizState) -> R) -> Option<R> {
        let mut guard = self.state.write().unwrap();
        guard.as_mut().map(f)
    }
}
