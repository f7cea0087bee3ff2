//! §6's token & CSRF surface: register/login/refresh/logout/logout-all/
//! change-password plus the csrf/sessions/ws-ticket reads. The refresh
//! token and CSRF secret travel as `__Host-`-prefixed, `HttpOnly`,
//! `Secure`, `SameSite=Strict` cookies; everything else is a plain JSON
//! body.

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use quiz_cache::QuizCache;
use quiz_errors::AppError;
use quiz_models::Id;
use quiz_repo::{AuthRepo, UserRepo};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth_middleware::AuthenticatedUser;
use crate::state::AppState;

pub(crate) const ACCESS_COOKIE: &str = "__Host-access-token";
const REFRESH_COOKIE: &str = "__Host-refresh-token";
const CSRF_COOKIE: &str = "__Host-csrf-secret";
const REFRESH_COOKIE_TTL_SECS: i64 = 7 * 24 * 3600;

fn durable_cookie(name: &'static str, value: String, max_age_secs: i64) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

fn expired_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

/// Sets all three of §4.8's session cookies: access token, refresh token,
/// and the CSRF secret. The access token is also returned in the JSON body
/// so that non-browser clients (which don't carry cookies) can use it as a
/// bearer credential; `AuthenticatedUser` accepts either.
fn session_cookies(jar: CookieJar, tokens: &quiz_auth::TokenPair) -> CookieJar {
    let access_ttl_secs = (tokens.access_expires_at - chrono::Utc::now()).num_seconds().max(0);
    jar.add(durable_cookie(ACCESS_COOKIE, tokens.access_token.clone(), access_ttl_secs))
        .add(durable_cookie(REFRESH_COOKIE, tokens.refresh_token.clone(), REFRESH_COOKIE_TTL_SECS))
        .add(durable_cookie(CSRF_COOKIE, tokens.csrf_token.clone(), REFRESH_COOKIE_TTL_SECS))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(length(min = 8))]
    pub password: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "en-US".to_string()
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Id,
    pub email: String,
    pub username: String,
}

impl From<quiz_models::User> for UserResponse {
    fn from(user: quiz_models::User) -> Self {
        Self { id: user.id, email: user.email, username: user.username }
    }
}

pub async fn register<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<UserResponse>, AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    body.validate().map_err(|err| AppError::Validation(err.to_string()))?;
    let user = state
        .auth
        .register(&body.email, &body.username, &body.password, &body.locale)
        .await?;
    Ok(Json(user.into()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    pub password: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub csrf_token: String,
    pub access_expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
    #[serde(flatten)]
    pub tokens: TokenResponse,
}

pub async fn login<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    jar: CookieJar,
    connect_info: Option<ConnectInfo<std::net::SocketAddr>>,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    body.validate().map_err(|err| AppError::Validation(err.to_string()))?;
    let ip = connect_info.map(|ci| ci.0.ip().to_string());
    let outcome = state
        .auth
        .login(&body.email, &body.password, body.device_id.clone(), ip, None)
        .await?;

    let jar = session_cookies(jar, &outcome.tokens);

    Ok((
        jar,
        Json(LoginResponse {
            user: outcome.user.into(),
            tokens: TokenResponse {
                access_token: outcome.tokens.access_token,
                csrf_token: outcome.tokens.csrf_token,
                access_expires_at: outcome.tokens.access_expires_at,
            },
        }),
    ))
}

pub async fn refresh<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<TokenResponse>), AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    let presented = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AppError::Unauthorized)?;

    let tokens = state.auth.refresh(&presented, None, None, None).await?;

    let jar = session_cookies(jar, &tokens);

    Ok((
        jar,
        Json(TokenResponse {
            access_token: tokens.access_token,
            csrf_token: tokens.csrf_token,
            access_expires_at: tokens.access_expires_at,
        }),
    ))
}

pub async fn logout<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    if let Some(presented) = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()) {
        state.auth.logout(&presented).await?;
    }
    let jar = jar
        .add(expired_cookie(ACCESS_COOKIE))
        .add(expired_cookie(REFRESH_COOKIE))
        .add(expired_cookie(CSRF_COOKIE));
    Ok((jar, StatusCode::NO_CONTENT))
}

pub async fn logout_all<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    jar: CookieJar,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<(CookieJar, StatusCode), AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    state.auth.logout_all(user_id).await?;
    let jar = jar
        .add(expired_cookie(ACCESS_COOKIE))
        .add(expired_cookie(REFRESH_COOKIE))
        .add(expired_cookie(CSRF_COOKIE));
    Ok((jar, StatusCode::NO_CONTENT))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    #[validate(length(min = 8))]
    pub new_password: String,
}

pub async fn change_password<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<StatusCode, AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    body.validate().map_err(|err| AppError::Validation(err.to_string()))?;
    state
        .auth
        .change_password(user_id, &body.current_password, &body.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

pub async fn csrf(jar: CookieJar) -> Result<Json<CsrfResponse>, AppError> {
    let secret = jar
        .get(CSRF_COOKIE)
        .and_then(|c| quiz_auth::CsrfSecret::from_cookie_value(c.value()))
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(CsrfResponse { csrf_token: secret.hash_hex() }))
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Id,
    pub device_id: Option<String>,
    pub ip: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<quiz_models::RefreshToken> for SessionResponse {
    fn from(token: quiz_models::RefreshToken) -> Self {
        Self {
            session_id: token.id,
            device_id: token.device_id,
            ip: token.ip,
            expires_at: token.expires_at,
        }
    }
}

pub async fn sessions<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<Vec<SessionResponse>>, AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    let sessions = state.auth.list_sessions(user_id).await?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct WsTicketResponse {
    pub ticket: String,
}

pub async fn ws_ticket<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<WsTicketResponse>, AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    let user = state
        .user_repo
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user".to_string()))?;
    let ticket = state.auth.issue_ws_ticket(&user).await?;
    Ok(Json(WsTicketResponse { ticket }))
}
