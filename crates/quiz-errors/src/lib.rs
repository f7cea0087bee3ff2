//! The error taxonomy of §7: every component returns an `AppError`, and it
//! is translated to an HTTP response or a `server:error` WS frame exactly
//! once, at the boundary. Grounded in `crates/control::error::AppError`'s
//! `thiserror` + `IntoResponse` shape, generalized from four variants to
//! the full taxonomy §7 calls for.

use quiz_models::events::OutboundMessage;

/// The stable taxonomy. Handlers map these to HTTP status codes; WS
/// handlers map them to `server:error { code, message }` frames. Never
/// closes the socket for a single bad message unless framing itself fails.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    #[error("expired: {0}")]
    Expired(String),

    #[error("rate limited, retry after {retry_after_sec}s")]
    RateLimited { retry_after_sec: u64 },

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A second `UserAnswer` for the same (user, quiz, question).
    AlreadyAnswered,
    /// A login/session attempt that would exceed `auth.session_limit`.
    SessionLimitExceeded,
    /// Generic unique-constraint violation not otherwise classified.
    UniqueViolation,
    /// Another quiz is already `in_progress` (the singleton-start guarantee).
    AnotherQuizInProgress,
    /// The target quiz was not in the expected state for this transition.
    QuizNotInExpectedState,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ConflictKind::AlreadyAnswered => "already answered",
            ConflictKind::SessionLimitExceeded => "session limit exceeded",
            ConflictKind::UniqueViolation => "unique constraint violated",
            ConflictKind::AnotherQuizInProgress => "another quiz in progress",
            ConflictKind::QuizNotInExpectedState => "quiz not in expected state",
        };
        f.write_str(msg)
    }
}

/// A machine-stable code, independent of the human `Display` message, used
/// in both HTTP problem-detail bodies and WS `server:error` frames.
pub fn error_code(err: &AppError) -> &'static str {
    match err {
        AppError::Validation(_) => "validation",
        AppError::Unauthorized => "unauthorized",
        AppError::Forbidden => "forbidden",
        AppError::NotFound(_) => "not_found",
        AppError::Conflict(_) => "conflict",
        AppError::Expired(_) => "expired",
        AppError::RateLimited { .. } => "rate_limited",
        AppError::DependencyUnavailable(_) => "dependency_unavailable",
        AppError::Internal(_) => "internal",
    }
}

impl AppError {
    /// Translate this error into a `server:error` WS frame. A single bad
    /// answer or stale resync never closes the socket — the frame is just
    /// sent to that session.
    pub fn to_ws_frame(&self) -> OutboundMessage {
        OutboundMessage::ServerError {
            code: error_code(self).to_string(),
            message: self.to_string(),
        }
    }
}

#[cfg(feature = "sqlx-support")]
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(ConflictKind::UniqueViolation)
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                tracing::error!(?err, "database dependency unavailable");
                AppError::DependencyUnavailable("database".to_string())
            }
            _ => {
                tracing::error!(?err, "unclassified database error");
                AppError::Internal(anyhow::Error::new(err))
            }
        }
    }
}

#[cfg(feature = "axum-response")]
mod axum_response {
    use super::{error_code, AppError, ConflictKind};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::Json;

    #[derive(Debug, serde::Serialize)]
    struct ProblemDetails {
        code: &'static str,
        error: String,
    }

    fn status_for(err: &AppError) -> StatusCode {
        match err {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(ConflictKind::AnotherQuizInProgress) => StatusCode::CONFLICT,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Expired(_) => StatusCode::GONE,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    impl IntoResponse for AppError {
        fn into_response(self) -> axum::response::Response {
            let status = status_for(&self);

            if status.is_server_error() {
                tracing::error!(error = ?self, "responding with server error");
            }

            let body = Json(ProblemDetails {
                code: error_code(&self),
                error: self.to_string(),
            });

            (status, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_kinds_have_stable_code() {
        assert_eq!(
            error_code(&AppError::Conflict(ConflictKind::AlreadyAnswered)),
            "conflict"
        );
    }

    #[test]
    fn ws_frame_carries_stable_code() {
        let err = AppError::Expired("refresh token".into());
        match err.to_ws_frame() {
            OutboundMessage::ServerError { code, .. } => assert_eq!(code, "expired"),
            _ => panic!("expected ServerError"),
        }
    }
}
