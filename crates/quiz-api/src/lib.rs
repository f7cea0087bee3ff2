//! The external contract this workspace actually implements per §1: the
//! `/ws` handshake (the fabric's entry point) and the token/CSRF
//! subsystem's own HTTP surface (register/login/refresh/logout/csrf/
//! sessions/ws-ticket). Quiz CRUD, admin routes, and the CSV/XLSX export
//! are modeled only as request/response shapes in [`admin_contracts`] —
//! routing and validation for those are an external collaborator's job.

pub mod admin_contracts;
pub mod auth_middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use quiz_cache::QuizCache;
use quiz_repo::{AuthRepo, UserRepo};

use crate::state::AppState;

/// Builds the axum router for everything this crate owns: the auth
/// surface (mixed public/authenticated/CSRF-guarded) and the single `/ws`
/// handshake. `triviacore-server` nests this under its own prefix and
/// layers tracing/compression on top.
pub fn router<U, A, C>(state: AppState<U, A, C>) -> Router
where
    U: UserRepo + 'static,
    A: AuthRepo + 'static,
    C: QuizCache + 'static,
{
    let mutating = Router::new()
        .route("/logout-all", post(routes::auth::logout_all::<U, A, C>))
        .route("/change-password", post(routes::auth::change_password::<U, A, C>))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware::require_csrf::<U, A, C>));

    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register::<U, A, C>))
        .route("/login", post(routes::auth::login::<U, A, C>))
        .route("/refresh", post(routes::auth::refresh::<U, A, C>))
        .route("/logout", post(routes::auth::logout::<U, A, C>))
        .route("/csrf", get(routes::auth::csrf))
        .route("/sessions", get(routes::auth::sessions::<U, A, C>))
        .route("/ws-ticket", get(routes::auth::ws_ticket::<U, A, C>))
        .merge(mutating);

    Router::new()
        .route("/healthz", get(routes::health::health_check))
        .route("/ws", get(routes::ws::ws_handshake::<U, A, C>))
        .nest("/api/auth", auth_routes)
        .with_state(state)
}

/// Periodic maintenance the composition root spawns alongside the server:
/// evicts idle WS sessions (§5: "socket read idle = 60s with 30s pings").
/// Not itself request-driven, so it lives here rather than in a route.
pub fn spawn_idle_sweep(hub: Arc<quiz_fabric::Hub>, pong_wait: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(pong_wait / 2);
        loop {
            ticker.tick().await;
            for (connection_id, user_id) in hub.sweep_idle(pong_wait) {
                tracing::info!(%connection_id, %user_id, "closed idle websocket session");
            }
        }
    });
}
