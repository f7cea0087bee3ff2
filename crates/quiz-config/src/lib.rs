//! Layered configuration, loaded `base` + `{app_env}` + `TRIVIACORE_`-prefixed
//! environment overrides. Grounded in `crates/control::config`'s three-layer
//! shape, expanded to the full key table of the original spec's §6.

mod app_env;

pub use app_env::{app_env, AppEnv};

use once_cell::sync::OnceCell;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub scheduling: SchedulingSettings,
    pub quiz: QuizSettings,
    pub difficulty: DifficultySettings,
    pub ws: WsSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_db_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_call_deadline_ms")]
    pub call_deadline_ms: u64,
}

fn default_db_min_connections() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    #[serde(default = "default_call_deadline_ms")]
    pub call_deadline_ms: u64,
}

fn default_call_deadline_ms() -> u64 {
    5_000
}

/// `scheduling.*` — pre-game timers and per-question pacing (§4.2, §4.4, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingSettings {
    #[serde(default = "default_announcement_minutes")]
    pub announcement_minutes: i64,
    #[serde(default = "default_waiting_room_minutes")]
    pub waiting_room_minutes: i64,
    #[serde(default = "default_countdown_seconds")]
    pub countdown_seconds: i64,
    #[serde(default = "default_question_delay_ms")]
    pub question_delay_ms: u64,
    #[serde(default = "default_answer_reveal_delay_ms")]
    pub answer_reveal_delay_ms: u64,
    #[serde(default = "default_inter_question_delay_ms")]
    pub inter_question_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_autofill_minutes")]
    pub autofill_minutes: i64,
}

fn default_announcement_minutes() -> i64 {
    30
}
fn default_waiting_room_minutes() -> i64 {
    5
}
fn default_countdown_seconds() -> i64 {
    60
}
fn default_question_delay_ms() -> u64 {
    500
}
fn default_answer_reveal_delay_ms() -> u64 {
    200
}
fn default_inter_question_delay_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_interval_ms() -> u64 {
    500
}
fn default_autofill_minutes() -> i64 {
    45
}

/// `quiz.*` — per-quiz caps and default prize pool (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct QuizSettings {
    #[serde(default = "default_max_questions_per_quiz")]
    pub max_questions_per_quiz: u32,
    #[serde(default = "default_total_prize_fund")]
    pub total_prize_fund: i64,
}

fn default_max_questions_per_quiz() -> u32 {
    10
}
fn default_total_prize_fund() -> i64 {
    1_000_000
}

/// `difficulty.*` — the adaptive selector's tunables (§4.5).
#[derive(Debug, Clone, Deserialize)]
pub struct DifficultySettings {
    #[serde(default = "default_target_pass_rates")]
    pub target_pass_rates: Vec<f64>,
    #[serde(default = "default_base_map")]
    pub base_map: Vec<i16>,
    #[serde(default = "default_adaptation_threshold")]
    pub adaptation_threshold: f64,
    #[serde(default = "default_fallback_to_higher")]
    pub fallback_to_higher: bool,
}

fn default_target_pass_rates() -> Vec<f64> {
    vec![0.90, 0.85, 0.78, 0.70, 0.62, 0.55, 0.48, 0.42, 0.36, 0.50]
}
fn default_base_map() -> Vec<i16> {
    vec![1, 2, 2, 3, 3, 4, 4, 5, 5, 5]
}
fn default_adaptation_threshold() -> f64 {
    0.10
}
fn default_fallback_to_higher() -> bool {
    true
}

/// `ws.*` — the connection fabric's shape (§4.1, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct WsSettings {
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default = "default_max_clients_per_shard")]
    pub max_clients_per_shard: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_write_wait_s")]
    pub write_wait_s: u64,
    #[serde(default = "default_pong_wait_s")]
    pub pong_wait_s: u64,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    #[serde(default = "default_hot_shard_load_fraction")]
    pub hot_shard_load_fraction: f64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

fn default_shard_count() -> usize {
    4
}
fn default_max_clients_per_shard() -> usize {
    5_000
}
fn default_max_message_size() -> usize {
    4_096
}
fn default_write_wait_s() -> u64 {
    10
}
fn default_pong_wait_s() -> u64 {
    60
}
fn default_outbound_queue_capacity() -> usize {
    256
}
fn default_max_connections_per_ip() -> usize {
    20
}
fn default_hot_shard_load_fraction() -> f64 {
    0.85
}
fn default_worker_pool_size() -> usize {
    16
}

/// `auth.*` — token & CSRF lifetimes (§4.8, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_session_limit")]
    pub session_limit: u32,
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: i64,
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: i64,
    #[serde(default = "default_ws_ticket_ttl_secs")]
    pub ws_ticket_ttl_secs: i64,
    #[serde(default = "default_key_rotation_interval_secs")]
    pub key_rotation_interval_secs: i64,
    #[serde(default = "default_key_verification_grace_secs")]
    pub key_verification_grace_secs: i64,
}

fn default_session_limit() -> u32 {
    10
}
fn default_access_ttl_secs() -> i64 {
    15 * 60
}
fn default_refresh_ttl_secs() -> i64 {
    720 * 3_600
}
fn default_ws_ticket_ttl_secs() -> i64 {
    60
}
fn default_key_rotation_interval_secs() -> i64 {
    30 * 24 * 3_600
}
fn default_key_verification_grace_secs() -> i64 {
    7 * 24 * 3_600
}

/// Loads layered settings once per process and caches the result, mirroring
/// `crates/control::config::settings`.
pub fn settings() -> &'static Settings {
    static SETTINGS: OnceCell<Settings> = OnceCell::new();
    SETTINGS.get_or_init(|| load_settings().expect("failed to load settings"))
}

pub fn load_settings() -> Result<Settings, config::ConfigError> {
    load_settings_from(&std::env::current_dir()
        .expect("current directory must be available")
        .join("config"))
}

/// Split out for testability: loads from an arbitrary config directory
/// instead of always resolving `./config`.
pub fn load_settings_from(config_dir: &std::path::Path) -> Result<Settings, config::ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(config_dir.join("base")).required(true))
        .add_source(config::File::from(config_dir.join(app_env().as_str())).required(false))
        .add_source(
            config::Environment::with_prefix("TRIVIACORE")
                .separator("__")
                .try_parsing(true),
        );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_base_settings_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("base.yaml")).unwrap();
        writeln!(
            base,
            r#"
application:
  host: "0.0.0.0"
  port: 8080
database:
  url: "postgres://localhost/triviacore"
redis:
  url: "redis://localhost"
scheduling: {{}}
quiz: {{}}
difficulty: {{}}
ws: {{}}
auth: {{}}
"#
        )
        .unwrap();

        let settings = load_settings_from(dir.path()).unwrap();
        assert_eq!(settings.application.port, 8080);
        assert_eq!(settings.quiz.max_questions_per_quiz, 10);
        assert_eq!(settings.difficulty.base_map, default_base_map());
        assert!(settings.difficulty.fallback_to_higher);
        assert_eq!(settings.ws.shard_count, 4);
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("base.yaml")).unwrap();
        writeln!(
            base,
            r#"
application:
  host: "0.0.0.0"
  port: 8080
database:
  url: "postgres://localhost/triviacore"
redis:
  url: "redis://localhost"
scheduling: {{}}
quiz:
  max_questions_per_quiz: 10
difficulty: {{}}
ws: {{}}
auth: {{}}
"#
        )
        .unwrap();

        std::env::set_var("TRIVIACORE_QUIZ__MAX_QUESTIONS_PER_QUIZ", "7");
        let settings = load_settings_from(dir.path()).unwrap();
        std::env::remove_var("TRIVIACORE_QUIZ__MAX_QUESTIONS_PER_QUIZ");

        assert_eq!(settings.quiz.max_questions_per_quiz, 7);
    }
}
