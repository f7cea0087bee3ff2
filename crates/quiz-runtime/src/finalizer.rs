use quiz_errors::AppError;
use quiz_models::events::OutboundMessage;
use quiz_repo::result_repo::FinalizationInput;

use crate::coordinator::RuntimeDeps;
use crate::state::ActiveQuizState;

/// §4.7: runs once per quiz on loop completion. The ranking/winner/prize
/// transaction itself lives in `ResultRepo::finalize_quiz`; this is the
/// thin wrapper that supplies the durable participant set, flips the quiz
/// to `completed`, and sends the two client-facing broadcasts. A DB
/// failure here is surfaced to the caller, which leaves the quiz
/// `in_progress` for a retry on the next orchestration tick (§7).
pub async fn finalize(deps: &RuntimeDeps, state: &ActiveQuizState) -> Result<(), AppError> {
    let participants: Vec<_> = deps
        .cache
        .participants(state.quiz.id)
        .await
        .map_err(|err| AppError::DependencyUnavailable(err.to_string()))?
        .into_iter()
        .collect();

    let input = FinalizationInput {
        quiz_id: state.quiz.id,
        participants,
        questions_run: state.position as i32,
    };

    deps.result_repo
        .finalize_quiz(input, state.quiz.prize_fund)
        .await?;

    deps.quiz_repo.mark_completed(state.quiz.id).await?;

    deps.hub
        .broadcast_to_quiz(state.quiz.id, OutboundMessage::QuizFinish { quiz_id: state.quiz.id })
        .await;
    deps.hub
        .broadcast_to_quiz(
            state.quiz.id,
            OutboundMessage::QuizResultsAvailable { quiz_id: state.quiz.id },
        )
        .await;

    Ok(())
}
