//! The composition root: wires the token/CSRF subsystem, the connection
//! fabric, and the quiz runtime to their Postgres/Redis-backed
//! collaborators and serves the `quiz-api` router. Grounded in
//! `crates/control`'s `cmd::serve`/`startup` split, collapsed into a
//! single binary since this workspace has exactly one server to run.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use quiz_auth::{AuthManager, KeyRotationTask, MasterKey};
use quiz_cache::backplane::RedisBackplane;
use quiz_cache::redis_cache::RedisQuizCache;
use quiz_config::Settings;
use quiz_fabric::{Hub, RetryPolicy};
use quiz_repo::{PgAnswerRepo, PgAuthRepo, PgPool, PgQuestionRepo, PgQuizRepo, PgResultRepo, PgUserRepo};
use quiz_runtime::{Coordinator, RuntimeDeps, Scheduler};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug)]
struct Args {
    /// Directory holding `base.yaml` and the `{app_env}.yaml` overlay.
    /// Defaults to `./config`, matching `quiz_config::load_settings`.
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

/// §6's exit-code scheme. `u8` discriminants double as the process exit
/// code via `ExitCode::from`.
#[derive(Debug, Clone, Copy)]
enum ExitReason {
    ConfigInvalid = 1,
    DependencyUnavailable = 2,
    SigningKeyBootstrapFailed = 3,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let args = Args::parse();
    let config_dir = args.config_dir.unwrap_or_else(|| {
        std::env::current_dir()
            .expect("current directory must be available")
            .join("config")
    });

    let settings = match quiz_config::load_settings_from(&config_dir) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(?err, "failed to load configuration");
            return ExitCode::from(ExitReason::ConfigInvalid as u8);
        }
    };

    // `main` can't be `async fn` and still return `ExitCode`, so the
    // runtime is built by hand rather than via `#[tokio::main]`.
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(?err, "failed to start the tokio runtime");
            return ExitCode::from(ExitReason::DependencyUnavailable as u8);
        }
    };

    match runtime.block_on(run(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(reason) => ExitCode::from(reason as u8),
    }
}

async fn run(settings: Settings) -> Result<(), ExitReason> {
    let db_pool = connect_postgres(&settings.database).await?;
    let backplane = Arc::new(connect_backplane(&settings.redis).await?);
    let cache = Arc::new(connect_cache(&settings.redis).await?);

    let master_key = Arc::new(MasterKey::from_env().map_err(|err| {
        tracing::error!(?err, "signing key bootstrap failed");
        ExitReason::SigningKeyBootstrapFailed
    })?);

    let user_repo = Arc::new(PgUserRepo::new(db_pool.clone()));
    let auth_repo = Arc::new(PgAuthRepo::new(db_pool.clone()));
    let quiz_repo: Arc<dyn quiz_repo::QuizRepo> = Arc::new(PgQuizRepo::new(db_pool.clone()));
    let question_repo: Arc<dyn quiz_repo::QuestionRepo> =
        Arc::new(PgQuestionRepo::new(db_pool.clone()));
    let answer_repo: Arc<dyn quiz_repo::AnswerRepo> = Arc::new(PgAnswerRepo::new(db_pool.clone()));
    let result_repo: Arc<dyn quiz_repo::ResultRepo> = Arc::new(PgResultRepo::new(db_pool.clone()));

    let key_rotation = KeyRotationTask::new(
        auth_repo.clone(),
        master_key.clone(),
        Duration::from_secs(settings.auth.key_rotation_interval_secs.max(0) as u64),
    );
    key_rotation.rotate_once().await.map_err(|err| {
        tracing::error!(?err, "initial signing key bootstrap/rotation failed");
        ExitReason::SigningKeyBootstrapFailed
    })?;
    tokio::spawn(key_rotation.run(shutdown_signal()));

    let hub = Hub::new(
        settings.ws.clone(),
        RetryPolicy {
            max_retries: settings.scheduling.max_retries,
            retry_interval: Duration::from_millis(settings.scheduling.retry_interval_ms),
        },
        backplane,
    );

    let auth = Arc::new(AuthManager::new(
        user_repo.clone(),
        auth_repo,
        cache.clone(),
        master_key,
        settings.auth.clone(),
    ));

    let coordinator = Coordinator::new(RuntimeDeps {
        quiz_repo: quiz_repo.clone(),
        question_repo,
        answer_repo,
        result_repo,
        cache,
        hub: hub.clone(),
        scheduling: settings.scheduling.clone(),
        quiz: settings.quiz.clone(),
        difficulty: settings.difficulty.clone(),
    });

    let scheduler = Scheduler::new(
        coordinator.clone(),
        quiz_repo,
        hub.clone(),
        settings.scheduling.clone(),
    );
    scheduler.arm_upcoming().await.map_err(|err| {
        tracing::error!(?err, "failed to arm upcoming quizzes at boot");
        ExitReason::DependencyUnavailable
    })?;

    quiz_api::spawn_idle_sweep(hub.clone(), Duration::from_secs(settings.ws.pong_wait_s));

    let state = quiz_api::state::AppState::new(auth, user_repo, coordinator, hub);

    let cors = if settings.application.cors_allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = settings
            .application
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    let app = quiz_api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.application.address())
        .await
        .map_err(|err| {
            tracing::error!(?err, "failed to bind listen address");
            ExitReason::DependencyUnavailable
        })?;

    tracing::info!(address = %settings.application.address(), "triviacore-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| {
        tracing::error!(?err, "server exited with an error");
        ExitReason::DependencyUnavailable
    })
}

async fn connect_postgres(db: &quiz_config::DatabaseSettings) -> Result<PgPool, ExitReason> {
    PgPoolOptions::new()
        .min_connections(db.min_connections)
        .acquire_timeout(Duration::from_millis(db.call_deadline_ms))
        .connect(&db.url)
        .await
        .map_err(|err| {
            tracing::error!(?err, "failed to connect to postgres");
            ExitReason::DependencyUnavailable
        })
}

async fn connect_backplane(redis: &quiz_config::RedisSettings) -> Result<RedisBackplane, ExitReason> {
    RedisBackplane::connect(&redis.url).await.map_err(|err| {
        tracing::error!(?err, "failed to connect to the redis backplane");
        ExitReason::DependencyUnavailable
    })
}

async fn connect_cache(redis: &quiz_config::RedisSettings) -> Result<RedisQuizCache, ExitReason> {
    RedisQuizCache::connect(&redis.url).await.map_err(|err| {
        tracing::error!(?err, "failed to connect to the redis cache");
        ExitReason::DependencyUnavailable
    })
}

/// Combines Ctrl+C and (on unix) SIGTERM into a single future, so
/// `axum::serve`'s graceful shutdown and the key rotation task both drain
/// on either signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
