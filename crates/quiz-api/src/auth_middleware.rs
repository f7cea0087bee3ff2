//! §4.8's two pieces of request-time enforcement: resolving the caller's
//! identity from an access token (cookie or bearer header), and — for
//! mutating routes — the Double Submit Cookie CSRF check. Grounded in
//! `crates/control::middleware`'s `FromRequestParts` extractor pattern,
//! generalized here from a single session cookie to the rotating-`kid`
//! verification `AuthManager` already owns.

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use quiz_auth::{AccessClaims, CsrfSecret};
use quiz_cache::QuizCache;
use quiz_errors::AppError;
use quiz_models::Id;
use quiz_repo::{AuthRepo, UserRepo};

use crate::routes::auth::ACCESS_COOKIE;
use crate::state::AppState;

const CSRF_COOKIE: &str = "__Host-csrf-secret";
const CSRF_HEADER: &str = "X-CSRF-Token";

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn access_token_from_headers(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| {
        CookieJar::from_headers(headers)
            .get(ACCESS_COOKIE)
            .map(|c| c.value().to_string())
    })
}

async fn verify_access_from_parts<U, A, C>(
    parts: &Parts,
    state: &AppState<U, A, C>,
) -> Result<AccessClaims, AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    let token = access_token_from_headers(&parts.headers).ok_or(AppError::Unauthorized)?;
    Ok(state.auth.verify_access(&token).await?)
}

/// Resolves to the authenticated user's id. Accepts the access token either
/// as a `Bearer` header or the `__Host-access-token` cookie, so browser and
/// non-browser clients both work against the same routes.
pub struct AuthenticatedUser(pub Id);

impl<U, A, C> FromRequestParts<AppState<U, A, C>> for AuthenticatedUser
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<U, A, C>,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let claims = verify_access_from_parts(parts, state).await?;
            Ok(AuthenticatedUser(claims.sub))
        }
    }
}

/// Axum middleware enforcing the Double Submit Cookie check on mutating
/// routes (§4.8: "Mutating requests must send that hash in the `X-CSRF-Token`
/// header"). Applied as a router layer rather than folded into
/// `AuthenticatedUser` itself, since several authenticated routes (session
/// reads, the ws-ticket issuance) are not mutations and must not require it.
pub async fn require_csrf<U, A, C>(
    State(state): State<AppState<U, A, C>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    let (parts, body) = request.into_parts();
    let claims = verify_access_from_parts(&parts, &state).await?;

    let jar = CookieJar::from_headers(&parts.headers);
    let cookie_secret = jar
        .get(CSRF_COOKIE)
        .and_then(|c| CsrfSecret::from_cookie_value(c.value()))
        .ok_or(AppError::Forbidden)?;
    let header_hash = parts
        .headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Forbidden)?;

    state.auth.verify_csrf(claims.sid, &cookie_secret, header_hash).await?;

    let request = Request::from_parts(parts, body);
    Ok(next.run(request).await)
}
