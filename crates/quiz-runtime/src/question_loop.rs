use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quiz_cache::QuizCache;
use quiz_errors::{AppError, ConflictKind};
use quiz_models::{events::OutboundMessage, EliminationReason, Id, Quiz, UserAnswer};
use quiz_repo::{AnswerRepo, QuestionRepo, QuizRepo};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{Coordinator, RuntimeDeps};

/// §4.4: drives the per-question phase sequence to completion or
/// cancellation. Spawned exactly once per successful `Coordinator::
/// try_start_quiz` call; `generation` lets `Coordinator::finish` refuse a
/// stale caller (e.g. a loop task still unwinding after its quiz was
/// superseded).
pub async fn run(coordinator: Arc<Coordinator>, quiz: Quiz, generation: u64, cancel: CancellationToken) {
    let deps = coordinator.deps();
    let question_count = quiz.question_count.max(0) as u32;

    for position in 1..=question_count {
        if cancel.is_cancelled() {
            break;
        }

        let used_ids = coordinator
            .read_state()
            .map(|s| s.used_question_ids.clone())
            .unwrap_or_default();

        let question = match quiz_selector::select_question(
            deps.question_repo.as_ref(),
            deps.cache.as_ref(),
            &deps.difficulty,
            quiz.id,
            position,
            &used_ids,
        )
        .await
        {
            Ok(question) => question,
            Err(err) => {
                tracing::error!(
                    quiz_id = %quiz.id,
                    position,
                    ?err,
                    "question selection failed; ending quiz loop early"
                );
                break;
            }
        };

        if sleep_or_cancelled(Duration::from_millis(deps.scheduling.question_delay_ms), &cancel).await {
            break;
        }

        let t_start = Utc::now().timestamp_millis();
        coordinator.with_write_state(|state| {
            state.current_question = Some(question.clone());
            state.position = position;
            state.question_start_ms = t_start;
            state.used_question_ids.push(question.id);
        });

        deps.hub
            .broadcast_to_quiz(
                quiz.id,
                OutboundMessage::QuizQuestion {
                    quiz_id: quiz.id,
                    position,
                    question: question.without_answer(),
                    server_timestamp: t_start,
                    time_limit: question.time_limit_sec,
                },
            )
            .await;

        let ticker = spawn_timer_ticker(deps.clone(), quiz.id, t_start, question.time_limit_sec, cancel.clone());

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(question.time_limit_sec as u64)) => {}
            _ = cancel.cancelled() => {}
        }
        ticker.abort();

        if cancel.is_cancelled() {
            break;
        }

        // Elimination sweep (§4.4 step 6): every locally-subscribed user
        // who never answered this question is eliminated for timing out.
        for user_id in deps.hub.active_subscribers_local(quiz.id) {
            if let Err(err) = sweep_one(&deps, quiz.id, question.id, position, user_id).await {
                tracing::warn!(
                    quiz_id = %quiz.id,
                    %user_id,
                    ?err,
                    "elimination sweep failed for participant"
                );
            }
        }

        if sleep_or_cancelled(Duration::from_millis(deps.scheduling.answer_reveal_delay_ms), &cancel).await {
            break;
        }
        deps.hub
            .broadcast_to_quiz(
                quiz.id,
                OutboundMessage::QuizAnswerReveal {
                    quiz_id: quiz.id,
                    correct_option: question.correct_option,
                },
            )
            .await;

        if let Err(err) = run_ad_break(&deps, quiz.id, position, &cancel).await {
            tracing::warn!(quiz_id = %quiz.id, position, ?err, "ad slot lookup failed; skipping ad break");
        }

        if quiz.finish_on_zero_players && deps.hub.active_subscribers_local(quiz.id).is_empty() {
            tracing::info!(quiz_id = %quiz.id, position, "ending early: zero active players");
            break;
        }

        if sleep_or_cancelled(Duration::from_millis(deps.scheduling.inter_question_delay_ms), &cancel).await {
            break;
        }
    }

    let used_ids = coordinator
        .read_state()
        .map(|s| s.used_question_ids.clone())
        .unwrap_or_default();
    if let Err(err) = deps.question_repo.mark_used_batch(&used_ids).await {
        tracing::error!(quiz_id = %quiz.id, ?err, "failed to mark used questions at quiz end");
    }

    coordinator.finish(generation).await;
}

/// Sleeps for `duration`, or stops early on cancellation. Returns `true`
/// if cancellation won the race, so callers can break out of the loop.
async fn sleep_or_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.cancelled() => true,
    }
}

/// §4.4 step 8: an optional ad break between the answer reveal and the
/// next question. A no-op when the quiz has no slot configured at this
/// position. Not cancellation-aware beyond the sleep itself — an ad break
/// already announced to clients runs to completion rather than being cut
/// short by a concurrent cancellation, matching the "never rewinds" rule
/// for steps that have already sent.
async fn run_ad_break(
    deps: &RuntimeDeps,
    quiz_id: Id,
    position: u32,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let Some(slot) = deps.quiz_repo.ad_slot_for_position(quiz_id, position).await? else {
        return Ok(());
    };

    deps.hub
        .broadcast_to_quiz(
            quiz_id,
            OutboundMessage::QuizAdBreak {
                quiz_id,
                media_type: slot.media_type,
                media_url: slot.media_url,
                duration_sec: slot.duration_sec,
            },
        )
        .await;

    sleep_or_cancelled(Duration::from_secs(slot.duration_sec as u64), cancel).await;

    deps.hub
        .broadcast_to_quiz(quiz_id, OutboundMessage::QuizAdBreakEnd { quiz_id })
        .await;

    Ok(())
}

fn spawn_timer_ticker(
    deps: Arc<RuntimeDeps>,
    quiz_id: Id,
    t_start_ms: i64,
    time_limit_sec: u32,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let deadline_ms = t_start_ms + time_limit_sec as i64 * 1000;
    tokio::spawn(async move {
        loop {
            let remaining_ms = deadline_ms - Utc::now().timestamp_millis();
            if remaining_ms <= 0 {
                return;
            }
            let remaining_sec = (remaining_ms / 1000).max(0) as u32;
            deps.hub
                .broadcast_to_quiz(quiz_id, OutboundMessage::QuizTimer { quiz_id, remaining_sec })
                .await;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = cancel.cancelled() => return,
            }
        }
    })
}

/// One user's share of the elimination sweep: skip if already eliminated
/// or already answered; otherwise persist a `no_answer_timeout` row, flip
/// the cache flag, and notify the user. Idempotent — a second sweep pass
/// over the same (quiz, user, question) hits the unique constraint on
/// `record_answer`, which is treated as already-handled.
async fn sweep_one(
    deps: &RuntimeDeps,
    quiz_id: Id,
    question_id: Id,
    position: u32,
    user_id: Id,
) -> Result<(), AppError> {
    if deps
        .cache
        .is_eliminated(quiz_id, user_id)
        .await
        .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?
    {
        return Ok(());
    }
    if deps
        .cache
        .is_answered(quiz_id, user_id, question_id)
        .await
        .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?
    {
        return Ok(());
    }

    let answer = UserAnswer {
        user_id,
        quiz_id,
        question_id,
        selected_option: None,
        is_correct: false,
        response_time_ms: 0,
        score: 0,
        is_eliminated: true,
        elimination_reason: Some(EliminationReason::NoAnswerTimeout),
    };
    if let Err(err) = deps.answer_repo.record_answer(&answer).await {
        if !matches!(err, AppError::Conflict(ConflictKind::AlreadyAnswered)) {
            return Err(err);
        }
    }

    deps.cache
        .mark_eliminated(quiz_id, user_id)
        .await
        .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?;

    deps.hub
        .send_to_user(
            user_id,
            OutboundMessage::QuizElimination {
                quiz_id,
                reason: EliminationReason::NoAnswerTimeout,
                eliminated_on_question: position as i32,
            },
        )
        .await;

    Ok(())
}
