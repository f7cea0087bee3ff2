use std::sync::Arc;

use quiz_auth::AuthManager;
use quiz_cache::QuizCache;
use quiz_fabric::Hub;
use quiz_repo::{AuthRepo, UserRepo};
use quiz_runtime::Coordinator;

/// The axum handlers' shared state: the token/CSRF subsystem, the live
/// quiz coordinator, and the connection fabric. Generic over the same
/// `AuthManager<U, A, C>` type parameters as `quiz-auth` itself, rather
/// than a trait object, since the composition root only ever needs one
/// concrete instantiation — `triviacore-server` picks `PgUserRepo`,
/// `PgAuthRepo`, `RedisQuizCache`; tests pick the in-memory fakes.
pub struct AppState<U, A, C> {
    pub auth: Arc<AuthManager<U, A, C>>,
    pub user_repo: Arc<U>,
    pub coordinator: Arc<Coordinator>,
    pub hub: Arc<Hub>,
}

// Every field is already `Arc`-wrapped, so cloning is cheap regardless of
// whether `U`/`A`/`C` themselves implement `Clone` — a manual impl avoids
// `#[derive(Clone)]`'s default `where U: Clone, A: Clone, C: Clone` bound,
// which the repository impl types have no reason to satisfy.
impl<U, A, C> Clone for AppState<U, A, C> {
    fn clone(&self) -> Self {
        Self {
            auth: self.auth.clone(),
            user_repo: self.user_repo.clone(),
            coordinator: self.coordinator.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<U, A, C> AppState<U, A, C>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    pub fn new(
        auth: Arc<AuthManager<U, A, C>>,
        user_repo: Arc<U>,
        coordinator: Arc<Coordinator>,
        hub: Arc<Hub>,
    ) -> Self {
        Self { auth, user_repo, coordinator, hub }
    }
}
