use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use quiz_config::SchedulingSettings;
use quiz_errors::AppError;
use quiz_fabric::Hub;
use quiz_models::{events::OutboundMessage, Id, Quiz};
use quiz_repo::QuizRepo;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;

struct ArmedQuiz {
    generation: u64,
    cancel: CancellationToken,
}

/// §4.2: arms the pre-game deadlines for a scheduled quiz and hands off
/// to the coordinator at kickoff. Reschedule safety uses a monotonically
/// increasing generation counter: re-arming a quiz id
/// bumps its generation and installs a fresh token, and the superseded
/// task's own generation check makes it exit at its next checkpoint
/// without firing.
pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    quiz_repo: Arc<dyn QuizRepo>,
    hub: Arc<Hub>,
    scheduling: SchedulingSettings,
    armed: Mutex<HashMap<Id, ArmedQuiz>>,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<Coordinator>,
        quiz_repo: Arc<dyn QuizRepo>,
        hub: Arc<Hub>,
        scheduling: SchedulingSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            quiz_repo,
            hub,
            scheduling,
            armed: Mutex::new(HashMap::new()),
        })
    }

    /// Boot-time arm-on-boot pass: every still-upcoming quiz gets a timer.
    pub async fn arm_upcoming(self: &Arc<Self>) -> Result<(), AppError> {
        for quiz in self.quiz_repo.list_upcoming().await? {
            self.arm(quiz);
        }
        Ok(())
    }

    /// (Re-)arms a single quiz, invalidating any timer previously armed
    /// for the same id.
    pub fn arm(self: &Arc<Self>, quiz: Quiz) {
        let generation = {
            let mut armed = self.armed.lock().unwrap();
            let generation = armed.get(&quiz.id).map(|a| a.generation + 1).unwrap_or(1);
            let cancel = CancellationToken::new();
            armed.insert(
                quiz.id,
                ArmedQuiz {
                    generation,
                    cancel,
                },
            );
            generation
        };

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_timers(quiz, generation).await;
        });
    }

    /// Cancels a previously-armed quiz (e.g. an admin cancellation); the
    /// armed task observes its token at its next checkpoint and exits.
    pub fn disarm(&self, quiz_id: Id) {
        if let Some(armed) = self.armed.lock().unwrap().remove(&quiz_id) {
            armed.cancel.cancel();
        }
    }

    fn is_current(&self, quiz_id: Id, generation: u64) -> bool {
        self.armed
            .lock()
            .unwrap()
            .get(&quiz_id)
            .map(|a| a.generation == generation)
            .unwrap_or(false)
    }

    fn cancel_token(&self, quiz_id: Id) -> Option<CancellationToken> {
        self.armed.lock().unwrap().get(&quiz_id).map(|a| a.cancel.clone())
    }

    async fn run_timers(self: Arc<Self>, quiz: Quiz, generation: u64) {
        let Some(cancel) = self.cancel_token(quiz.id) else {
            return;
        };

        let stages: [(&str, i64); 4] = [
            ("autofill", self.scheduling.autofill_minutes * 60),
            ("announcement", self.scheduling.announcement_minutes * 60),
            ("waiting_room", self.scheduling.waiting_room_minutes * 60),
            ("countdown", self.scheduling.countdown_seconds),
        ];

        for (stage, offset_sec) in stages {
            if !self.is_current(quiz.id, generation) {
                return;
            }
            let deadline = quiz.scheduled_time - ChronoDuration::seconds(offset_sec);
            if !self.sleep_until(deadline, &cancel).await {
                return;
            }
            self.on_stage(stage, &quiz).await;
        }

        if !self.is_current(quiz.id, generation) {
            return;
        }
        if !self.sleep_until(quiz.scheduled_time, &cancel).await {
            return;
        }
        if !self.is_current(quiz.id, generation) {
            return;
        }

        match self.coordinator.try_start_quiz(quiz.id).await {
            Ok(()) => {
                self.armed.lock().unwrap().remove(&quiz.id);
            }
            Err(err) => {
                tracing::warn!(quiz_id = %quiz.id, ?err, "scheduled quiz failed to start");
            }
        }
    }

    async fn on_stage(&self, stage: &str, quiz: &Quiz) {
        match stage {
            "announcement" => {
                self.hub
                    .broadcast_to_quiz(
                        quiz.id,
                        OutboundMessage::QuizAnnouncement {
                            quiz_id: quiz.id,
                            starts_at: quiz.scheduled_time,
                        },
                    )
                    .await;
            }
            other => {
                tracing::debug!(quiz_id = %quiz.id, stage = other, "scheduler stage reached");
            }
        }
    }

    /// Sleeps until `deadline`, cancellable. A deadline already in the
    /// past (a stale schedule) fires immediately rather than blocking
    /// startup. Returns `false` if cancellation won the race.
    async fn sleep_until(&self, deadline: DateTime<Utc>, cancel: &CancellationToken) -> bool {
        let duration = (deadline - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RuntimeDeps;
    use async_trait::async_trait;
    use quiz_cache::{backplane::InMemoryBackplane, memory::InMemoryQuizCache};
    use quiz_config::{DifficultySettings, QuizSettings, WsSettings};
    use quiz_errors::ConflictKind;
    use quiz_models::{Id, Question, QuizStatus};
    use quiz_repo::{AnswerRepo, QuestionRepo};
    use std::sync::Mutex as StdMutex;

    fn retry_policy() -> quiz_fabric::RetryPolicy {
        quiz_fabric::RetryPolicy {
            max_retries: 3,
            retry_interval: std::time::Duration::from_millis(5),
        }
    }

    fn ws_settings() -> WsSettings {
        WsSettings {
            shard_count: 1,
            max_clients_per_shard: 10,
            max_message_size: 4096,
            write_wait_s: 10,
            pong_wait_s: 60,
            outbound_queue_capacity: 8,
            max_connections_per_ip: 10,
            hot_shard_load_fraction: 0.85,
            worker_pool_size: 2,
        }
    }

    struct FakeQuizRepo {
        quiz: Quiz,
        started: StdMutex<bool>,
    }

    #[async_trait]
    impl QuizRepo for FakeQuizRepo {
        async fn find_by_id(&self, _id: Id) -> Result<Option<Quiz>, AppError> {
            Ok(Some(self.quiz.clone()))
        }
        async fn list_upcoming(&self) -> Result<Vec<Quiz>, AppError> {
            Ok(vec![self.quiz.clone()])
        }
        async fn start_atomic(&self, id: Id) -> Result<Quiz, AppError> {
            let mut started = self.started.lock().unwrap();
            if *started {
                return Err(AppError::Conflict(ConflictKind::QuizNotInExpectedState));
            }
            *started = true;
            let mut quiz = self.quiz.clone();
            quiz.id = id;
            quiz.status = QuizStatus::InProgress;
            Ok(quiz)
        }
        async fn mark_completed(&self, _id: Id) -> Result<(), AppError> {
            Ok(())
        }
        async fn mark_cancelled(&self, _id: Id) -> Result<(), AppError> {
            Ok(())
        }
        async fn count_available_pool_questions(&self, _min_count: i64) -> Result<i64, AppError> {
            Ok(0)
        }
        async fn count_embedded_questions(&self, _quiz_id: Id) -> Result<i64, AppError> {
            Ok(0)
        }
        async fn ad_slot_for_position(
            &self,
            _quiz_id: Id,
            _position: u32,
        ) -> Result<Option<quiz_models::AdSlot>, AppError> {
            Ok(None)
        }
    }

    struct EmptyQuestionRepo;
    #[async_trait]
    impl QuestionRepo for EmptyQuestionRepo {
        async fn find_by_id(&self, _id: Id) -> Result<Option<Question>, AppError> {
            Ok(None)
        }
        async fn random_unused_quiz_question(
            &self,
            _quiz_id: Id,
            _difficulty: quiz_models::Difficulty,
            _exclude: &[Id],
        ) -> Result<Option<Question>, AppError> {
            Ok(None)
        }
        async fn random_unused_pool_question(
            &self,
            _difficulty: quiz_models::Difficulty,
            _exclude: &[Id],
        ) -> Result<Option<Question>, AppError> {
            Ok(None)
        }
        async fn mark_used_batch(&self, _ids: &[Id]) -> Result<(), AppError> {
            Ok(())
        }
    }

    struct EmptyAnswerRepo;
    #[async_trait]
    impl AnswerRepo for EmptyAnswerRepo {
        async fn record_answer(&self, _answer: &quiz_models::UserAnswer) -> Result<(), AppError> {
            Ok(())
        }
        async fn list_for_quiz(&self, _quiz_id: Id) -> Result<Vec<quiz_models::UserAnswer>, AppError> {
            Ok(vec![])
        }
    }

    struct EmptyResultRepo;
    #[async_trait]
    impl quiz_repo::ResultRepo for EmptyResultRepo {
        async fn finalize_quiz(
            &self,
            input: quiz_repo::result_repo::FinalizationInput,
            _prize_fund: i64,
        ) -> Result<quiz_repo::result_repo::FinalizationSummary, AppError> {
            Ok(quiz_repo::result_repo::FinalizationSummary {
                winner_ids: input.participants,
                prize_per_winner: 0,
            })
        }
    }

    fn make_coordinator(quiz: Quiz) -> Arc<Coordinator> {
        let hub = Hub::new(ws_settings(), retry_policy(), Arc::new(InMemoryBackplane::new()));
        let deps = RuntimeDeps {
            quiz_repo: Arc::new(FakeQuizRepo {
                quiz,
                started: StdMutex::new(false),
            }),
            question_repo: Arc::new(EmptyQuestionRepo),
            answer_repo: Arc::new(EmptyAnswerRepo),
            result_repo: Arc::new(EmptyResultRepo),
            cache: Arc::new(InMemoryQuizCache::new()),
            hub,
            scheduling: SchedulingSettings {
                announcement_minutes: 0,
                waiting_room_minutes: 0,
                countdown_seconds: 0,
                question_delay_ms: 1,
                answer_reveal_delay_ms: 1,
                inter_question_delay_ms: 1,
                max_retries: 3,
                retry_interval_ms: 10,
                autofill_minutes: 0,
            },
            quiz: QuizSettings {
                max_questions_per_quiz: 10,
                total_prize_fund: 1_000_000,
            },
            difficulty: DifficultySettings {
                target_pass_rates: vec![0.5; 10],
                base_map: vec![1; 10],
                adaptation_threshold: 0.10,
                fallback_to_higher: true,
            },
        };
        Coordinator::new(deps)
    }

    fn test_quiz() -> Quiz {
        Quiz {
            id: Id::generate(),
            title: "t".into(),
            description: None,
            scheduled_time: Utc::now(),
            status: QuizStatus::Scheduled,
            question_count: 0,
            prize_fund: 0,
            finish_on_zero_players: true,
        }
    }

    #[tokio::test]
    async fn reschedule_invalidates_the_prior_timer() {
        let quiz = test_quiz();
        let coordinator = make_coordinator(quiz.clone());
        let scheduler = Scheduler::new(
            coordinator.clone(),
            Arc::new(FakeQuizRepo {
                quiz: quiz.clone(),
                started: StdMutex::new(false),
            }),
            Hub::new(ws_settings(), retry_policy(), Arc::new(InMemoryBackplane::new())),
            SchedulingSettings {
                announcement_minutes: 0,
                waiting_room_minutes: 0,
                countdown_seconds: 100,
                question_delay_ms: 1,
                answer_reveal_delay_ms: 1,
                inter_question_delay_ms: 1,
                max_retries: 3,
                retry_interval_ms: 10,
                autofill_minutes: 0,
            },
        );

        scheduler.arm(quiz.clone());
        assert!(scheduler.is_current(quiz.id, 1));
        scheduler.arm(quiz.clone());
        assert!(!scheduler.is_current(quiz.id, 1));
        assert!(scheduler.is_current(quiz.id, 2));
    }
}
