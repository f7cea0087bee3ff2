//! The composition point for the whole token & CSRF subsystem. Threaded
//! as an explicit dependency from the composition root (§9: "Global
//! mutable singletons ... expose as explicit dependencies"), not a
//! process-wide static, so tests can inject in-memory fakes for
//! `UserRepo`/`AuthRepo`/`QuizCache`.

use std::sync::Arc;

use quiz_cache::QuizCache;
use quiz_config::AuthSettings;
use quiz_models::{Id, InvalidationMark, User};
use quiz_repo::{AuthRepo, UserRepo};

use crate::claims::AccessClaims;
use crate::csrf::CsrfSecret;
use crate::key_crypto::MasterKey;
use crate::keyring::KeyRing;
use crate::{password, refresh, ws_ticket, AuthError};

pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub csrf_token: String,
    pub session_id: Id,
    pub access_expires_at: chrono::DateTime<chrono::Utc>,
    pub refresh_expires_at: chrono::DateTime<chrono::Utc>,
}

pub struct LoginOutcome {
    pub user: User,
    pub tokens: TokenPair,
}

pub struct AuthManager<U, A, C> {
    user_repo: Arc<U>,
    auth_repo: Arc<A>,
    cache: Arc<C>,
    keyring: KeyRing,
    master_key: Arc<MasterKey>,
    settings: AuthSettings,
}

impl<U, A, C> AuthManager<U, A, C>
where
    U: UserRepo,
    A: AuthRepo,
    C: QuizCache,
{
    pub fn new(
        user_repo: Arc<U>,
        auth_repo: Arc<A>,
        cache: Arc<C>,
        master_key: Arc<MasterKey>,
        settings: AuthSettings,
    ) -> Self {
        let keyring = KeyRing::new((*master_key).clone());
        Self {
            user_repo,
            auth_repo,
            cache,
            keyring,
            master_key,
            settings,
        }
    }

    pub async fn register(
        &self,
        email: &str,
        username: &str,
        plaintext_password: &str,
        locale: &str,
    ) -> Result<User, AuthError> {
        let hash = password::hash_password(plaintext_password)
            .map_err(|err| AuthError::Crypto(anyhow::anyhow!(err.to_string())))?;
        Ok(self
            .user_repo
            .create(email, username, &hash, locale)
            .await?)
    }

    pub async fn login(
        &self,
        email: &str,
        plaintext_password: &str,
        device_id: Option<String>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<LoginOutcome, AuthError> {
        let user = self
            .user_repo
            .find_by_email(email)
            .await?
            .filter(User::is_active)
            .ok_or(AuthError::InvalidCredentials)?;

        let matches = password::verify_password(plaintext_password, &user.password_hash)
            .map_err(|err| AuthError::Crypto(anyhow::anyhow!(err.to_string())))?;
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.issue_session(user.id, device_id, ip, user_agent).await?;
        Ok(LoginOutcome { user, tokens })
    }

    /// Mints a brand-new refresh+access+CSRF triple for `user_id`,
    /// enforcing the per-user session cap (§4.8) before inserting.
    async fn issue_session(
        &self,
        user_id: Id,
        device_id: Option<String>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenPair, AuthError> {
        let active_key = self
            .auth_repo
            .active_jwt_key()
            .await?
            .ok_or(AuthError::NoActiveKey)?;

        let active_sessions = self.auth_repo.list_active_refresh_tokens(user_id).await?;
        let to_evict = refresh::sessions_to_evict(
            &active_sessions.iter().map(|t| t.id).collect::<Vec<_>>(),
            self.settings.session_limit,
        );
        for id in to_evict {
            self.auth_repo.revoke_refresh_token(id, "session_limit_exceeded").await?;
        }

        let now = chrono::Utc::now();
        let new_refresh = refresh::generate();
        let session_id = Id::generate();
        let refresh_expires_at = now + chrono::Duration::seconds(self.settings.refresh_ttl_secs);

        self.auth_repo
            .insert_refresh_token(&quiz_models::RefreshToken {
                id: session_id,
                user_id,
                token_hash: new_refresh.hash,
                device_id,
                ip,
                user_agent,
                expires_at: refresh_expires_at,
                revoked_at: None,
                revoked_reason: None,
            })
            .await?;

        let csrf_secret = CsrfSecret::generate();
        self.cache
            .set_csrf_secret_hash(session_id, csrf_secret.hash())
            .await
            .map_err(|err| AuthError::App(quiz_errors::AppError::DependencyUnavailable(err.to_string())))?;

        let access_ttl = chrono::Duration::seconds(self.settings.access_ttl_secs);
        let claims = AccessClaims::new(user_id, session_id, csrf_secret.hash_hex(), now, access_ttl);
        let access_token = self.keyring.sign(&active_key, &claims)?;

        Ok(TokenPair {
            access_token,
            refresh_token: new_refresh.plaintext,
            csrf_token: csrf_secret.hash_hex(),
            session_id,
            access_expires_at: now + access_ttl,
            refresh_expires_at,
        })
    }

    /// §4.8's atomic refresh sequence: validate, revoke the presented
    /// token, issue a fresh pair (including a new CSRF secret), enforcing
    /// the session cap again on the way in.
    pub async fn refresh(
        &self,
        presented_refresh_token: &str,
        device_id: Option<String>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TokenPair, AuthError> {
        let hash = refresh::hash_token(presented_refresh_token);
        let existing = self
            .auth_repo
            .find_active_refresh_token(hash)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        self.auth_repo
            .revoke_refresh_token(existing.id, "rotated")
            .await?;

        self.issue_session(existing.user_id, device_id, ip, user_agent).await
    }

    /// Verifies `current_password` against the stored hash and, on success,
    /// persists a freshly-hashed `new_password`. Does not touch existing
    /// sessions; a client that wants every other device logged out should
    /// follow up with `logout_all`.
    pub async fn change_password(
        &self,
        user_id: Id,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self
            .user_repo
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let matches = password::verify_password(current_password, &user.password_hash)
            .map_err(|err| AuthError::Crypto(anyhow::anyhow!(err.to_string())))?;
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }

        let hash = password::hash_password(new_password)
            .map_err(|err| AuthError::Crypto(anyhow::anyhow!(err.to_string())))?;
        self.user_repo.update_password_hash(user_id, &hash).await?;
        Ok(())
    }

    /// The active-session list for §6's `GET /api/auth/sessions`: every
    /// non-expired, non-revoked refresh token for the user, oldest first.
    pub async fn list_sessions(&self, user_id: Id) -> Result<Vec<quiz_models::RefreshToken>, AuthError> {
        Ok(self.auth_repo.list_active_refresh_tokens(user_id).await?)
    }

    pub async fn logout(&self, presented_refresh_token: &str) -> Result<(), AuthError> {
        let hash = refresh::hash_token(presented_refresh_token);
        if let Some(existing) = self.auth_repo.find_active_refresh_token(hash).await? {
            self.auth_repo.revoke_refresh_token(existing.id, "logout").await?;
        }
        Ok(())
    }

    /// Global logout (§4.8, §8: "After `logout-all` every access token
    /// issued before the call fails verification"). Revokes every refresh
    /// token and sets an invalidation mark in both the durable store and
    /// the cache (the cache write is what other instances observe via the
    /// backplane fanout described in §5).
    pub async fn logout_all(&self, user_id: Id) -> Result<(), AuthError> {
        self.auth_repo.revoke_all_for_user(user_id, "logout_all").await?;
        let cutoff = chrono::Utc::now();
        self.auth_repo
            .set_invalidation_mark(InvalidationMark { user_id, cutoff })
            .await?;
        self.cache
            .set_invalidation_mark(user_id, cutoff)
            .await
            .map_err(|err| AuthError::App(quiz_errors::AppError::DependencyUnavailable(err.to_string())))?;
        Ok(())
    }

    /// Verifies an access token: signature + `kid` window, expiration,
    /// the global-logout invalidation mark, and that the embedded CSRF
    /// hash is still the session's live one (a prior refresh invalidates
    /// it immediately, per §4.8).
    pub async fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let window_keys = self.auth_repo.verification_window_keys().await?;
        let claims = self.keyring.verify(token, &window_keys)?;

        if let Some(cutoff) = self.invalidation_cutoff(claims.sub).await? {
            let issued_at = claims.issued_at().unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
            if issued_at <= cutoff {
                return Err(AuthError::TokenExpired);
            }
        }

        Ok(claims)
    }

    async fn invalidation_cutoff(
        &self,
        user_id: Id,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, AuthError> {
        if let Some(mark) = self
            .cache
            .invalidation_mark(user_id)
            .await
            .map_err(|err| AuthError::App(quiz_errors::AppError::DependencyUnavailable(err.to_string())))?
        {
            return Ok(Some(mark));
        }
        // Cache miss: fall back to the durable mark and backfill the cache.
        if let Some(mark) = self.auth_repo.invalidation_mark(user_id).await? {
            let _ = self.cache.set_invalidation_mark(user_id, mark.cutoff).await;
            return Ok(Some(mark.cutoff));
        }
        Ok(None)
    }

    /// Verifies the double-submit CSRF pair for a mutating request, and
    /// that the presented hash is still the session's current one.
    pub async fn verify_csrf(
        &self,
        session_id: Id,
        cookie_secret: &CsrfSecret,
        header_hash: &str,
    ) -> Result<(), AuthError> {
        if !crate::csrf::verify_double_submit(cookie_secret, header_hash) {
            return Err(AuthError::CsrfMismatch);
        }
        let current = self
            .cache
            .csrf_secret_hash(session_id)
            .await
            .map_err(|err| AuthError::App(quiz_errors::AppError::DependencyUnavailable(err.to_string())))?;
        match current {
            Some(hash) if hash == cookie_secret.hash() => Ok(()),
            _ => Err(AuthError::CsrfMismatch),
        }
    }

    /// Issues a ≤60s single-audience WS ticket, signed with the active
    /// JWT key's own secret material so it can't be forged from any other
    /// credential this subsystem issues.
    pub async fn issue_ws_ticket(&self, user: &User) -> Result<String, AuthError> {
        let active_key = self
            .auth_repo
            .active_jwt_key()
            .await?
            .ok_or(AuthError::NoActiveKey)?;
        let secret = self
            .master_key
            .decrypt(&active_key.encrypted_secret, &active_key.nonce)
            .map_err(|err| AuthError::Crypto(anyhow::Error::new(err)))?;
        ws_ticket::issue(
            user.id,
            &user.email,
            chrono::Duration::seconds(self.settings.ws_ticket_ttl_secs),
            &secret,
        )
    }

    pub fn verify_ws_ticket(&self, ticket: &str, secret: &[u8]) -> Result<ws_ticket::WsTicketClaims, AuthError> {
        ws_ticket::verify(ticket, secret)
    }

    /// Verifies a ticket against the currently active key's secret
    /// material, mirroring `issue_ws_ticket`'s own lookup. Correct as long
    /// as no rotation lands inside the ticket's (≤60s) lifetime; a ticket
    /// that straddles a rotation is rejected and the client simply asks
    /// for a new one.
    pub async fn verify_ws_ticket_fresh(&self, ticket: &str) -> Result<ws_ticket::WsTicketClaims, AuthError> {
        let active_key = self
            .auth_repo
            .active_jwt_key()
            .await?
            .ok_or(AuthError::NoActiveKey)?;
        let secret = self
            .master_key
            .decrypt(&active_key.encrypted_secret, &active_key.nonce)
            .map_err(|err| AuthError::Crypto(anyhow::Error::new(err)))?;
        ws_ticket::verify(ticket, &secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quiz_cache::memory::InMemoryQuizCache;
    use quiz_errors::AppError;
    use quiz_models::{JwtKey, RefreshToken};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeUserRepo {
        by_id: Mutex<HashMap<Id, User>>,
    }

    #[async_trait]
    impl UserRepo for FakeUserRepo {
        async fn create(
            &self,
            email: &str,
            username: &str,
            password_hash: &str,
            locale: &str,
        ) -> Result<User, AppError> {
            let user = User {
                id: Id::generate(),
                email: email.to_string(),
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                locale: locale.to_string(),
                games_played: 0,
                total_score: 0,
                wins_count: 0,
                total_prize_won: 0,
                deleted_at: None,
            };
            self.by_id.lock().unwrap().insert(user.id, user.clone());
            Ok(user)
        }

        async fn find_by_id(&self, id: Id) -> Result<Option<User>, AppError> {
            Ok(self.by_id.lock().unwrap().get(&id).cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
            Ok(self
                .by_id
                .lock()
                .unwrap()
                .values()
                .find(|u| u.email == email)
                .cloned())
        }

        async fn update_password_hash(&self, id: Id, password_hash: &str) -> Result<(), AppError> {
            if let Some(user) = self.by_id.lock().unwrap().get_mut(&id) {
                user.password_hash = password_hash.to_string();
            }
            Ok(())
        }

        async fn soft_delete(&self, id: Id) -> Result<(), AppError> {
            if let Some(user) = self.by_id.lock().unwrap().get_mut(&id) {
                user.deleted_at = Some(chrono::Utc::now());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeAuthRepo {
        keys: Mutex<Vec<JwtKey>>,
        tokens: Mutex<HashMap<Id, RefreshToken>>,
        marks: Mutex<HashMap<Id, InvalidationMark>>,
    }

    impl FakeAuthRepo {
        fn bootstrapped(master_key: &MasterKey) -> Self {
            let repo = Self::default();
            let (encrypted_secret, nonce) = master_key.encrypt(b"test-signing-secret").unwrap();
            repo.keys.lock().unwrap().push(JwtKey {
                kid: "kid-test".to_string(),
                encrypted_secret,
                nonce,
                algorithm: "HS256".to_string(),
                is_active: true,
                expires_at: chrono::Utc::now() + chrono::Duration::days(30),
                rotated_at: None,
            });
            repo
        }
    }

    #[async_trait]
    impl AuthRepo for FakeAuthRepo {
        async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
            self.tokens.lock().unwrap().insert(token.id, token.clone());
            Ok(())
        }

        async fn find_active_refresh_token(
            &self,
            token_hash: [u8; 32],
        ) -> Result<Option<RefreshToken>, AppError> {
            let now = chrono::Utc::now();
            Ok(self
                .tokens
                .lock()
                .unwrap()
                .values()
                .find(|t| t.token_hash == token_hash && t.is_active(now))
                .cloned())
        }

        async fn revoke_refresh_token(&self, id: Id, reason: &str) -> Result<(), AppError> {
            if let Some(token) = self.tokens.lock().unwrap().get_mut(&id) {
                token.revoked_at = Some(chrono::Utc::now());
                token.revoked_reason = Some(reason.to_string());
            }
            Ok(())
        }

        async fn list_active_refresh_tokens(&self, user_id: Id) -> Result<Vec<RefreshToken>, AppError> {
            let now = chrono::Utc::now();
            let mut tokens: Vec<_> = self
                .tokens
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.user_id == user_id && t.is_active(now))
                .cloned()
                .collect();
            tokens.sort_by_key(|t| t.expires_at);
            Ok(tokens)
        }

        async fn revoke_all_for_user(&self, user_id: Id, reason: &str) -> Result<(), AppError> {
            for token in self.tokens.lock().unwrap().values_mut() {
                if token.user_id == user_id {
                    token.revoked_at = Some(chrono::Utc::now());
                    token.revoked_reason = Some(reason.to_string());
                }
            }
            Ok(())
        }

        async fn insert_jwt_key(&self, key: &JwtKey) -> Result<(), AppError> {
            self.keys.lock().unwrap().push(key.clone());
            Ok(())
        }

        async fn active_jwt_key(&self) -> Result<Option<JwtKey>, AppError> {
            Ok(self.keys.lock().unwrap().iter().find(|k| k.is_active).cloned())
        }

        async fn verification_window_keys(&self) -> Result<Vec<JwtKey>, AppError> {
            Ok(self.keys.lock().unwrap().clone())
        }

        async fn deactivate_jwt_key(&self, kid: &str) -> Result<(), AppError> {
            if let Some(key) = self.keys.lock().unwrap().iter_mut().find(|k| k.kid == kid) {
                key.is_active = false;
                key.rotated_at = Some(chrono::Utc::now());
            }
            Ok(())
        }

        async fn prune_expired_jwt_keys(&self) -> Result<u64, AppError> {
            Ok(0)
        }

        async fn set_invalidation_mark(&self, mark: InvalidationMark) -> Result<(), AppError> {
            self.marks.lock().unwrap().insert(mark.user_id, mark);
            Ok(())
        }

        async fn invalidation_mark(&self, user_id: Id) -> Result<Option<InvalidationMark>, AppError> {
            Ok(self.marks.lock().unwrap().get(&user_id).copied())
        }
    }

    fn test_settings() -> AuthSettings {
        AuthSettings {
            session_limit: 2,
            access_ttl_secs: 900,
            refresh_ttl_secs: 3600,
            ws_ticket_ttl_secs: 60,
            key_rotation_interval_secs: 1,
            key_verification_grace_secs: 1,
        }
    }

    fn test_manager() -> AuthManager<FakeUserRepo, FakeAuthRepo, InMemoryQuizCache> {
        let master_key = Arc::new(MasterKey::from_bytes(&[4u8; 32]).unwrap());
        let auth_repo = Arc::new(FakeAuthRepo::bootstrapped(&master_key));
        AuthManager::new(
            Arc::new(FakeUserRepo::default()),
            auth_repo,
            Arc::new(InMemoryQuizCache::new()),
            master_key,
            test_settings(),
        )
    }

    #[tokio::test]
    async fn register_then_login_succeeds() {
        let manager = test_manager();
        manager
            .register("a@b.com", "alice", "correct horse battery staple", "en-US")
            .await
            .unwrap();

        let outcome = manager
            .login("a@b.com", "correct horse battery staple", None, None, None)
            .await
            .unwrap();
        assert_eq!(outcome.user.email, "a@b.com");
        assert!(!outcome.tokens.access_token.is_empty());
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_rejected() {
        let manager = test_manager();
        manager
            .register("a@b.com", "alice", "correct horse battery staple", "en-US")
            .await
            .unwrap();

        let err = manager
            .login("a@b.com", "wrong password", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn access_token_round_trips_through_verify() {
        let manager = test_manager();
        manager
            .register("a@b.com", "alice", "correct horse battery staple", "en-US")
            .await
            .unwrap();
        let outcome = manager
            .login("a@b.com", "correct horse battery staple", None, None, None)
            .await
            .unwrap();

        let claims = manager.verify_access(&outcome.tokens.access_token).await.unwrap();
        assert_eq!(claims.sub, outcome.user.id);
    }

    #[tokio::test]
    async fn refresh_rotates_token_and_invalidates_the_old_one() {
        let manager = test_manager();
        manager
            .register("a@b.com", "alice", "correct horse battery staple", "en-US")
            .await
            .unwrap();
        let outcome = manager
            .login("a@b.com", "correct horse battery staple", None, None, None)
            .await
            .unwrap();

        let refreshed = manager
            .refresh(&outcome.tokens.refresh_token, None, None, None)
            .await
            .unwrap();
        assert_ne!(refreshed.refresh_token, outcome.tokens.refresh_token);

        let err = manager
            .refresh(&outcome.tokens.refresh_token, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn session_limit_evicts_oldest_session() {
        let manager = test_manager();
        manager
            .register("a@b.com", "alice", "correct horse battery staple", "en-US")
            .await
            .unwrap();

        let first = manager
            .login("a@b.com", "correct horse battery staple", None, None, None)
            .await
            .unwrap();
        let _second = manager
            .login("a@b.com", "correct horse battery staple", None, None, None)
            .await
            .unwrap();
        let _third = manager
            .login("a@b.com", "correct horse battery staple", None, None, None)
            .await
            .unwrap();

        // session_limit is 2, so the first login's refresh token must have
        // been evicted by the third.
        let err = manager
            .refresh(&first.tokens.refresh_token, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn logout_all_invalidates_existing_access_tokens() {
        let manager = test_manager();
        manager
            .register("a@b.com", "alice", "correct horse battery staple", "en-US")
            .await
            .unwrap();
        let outcome = manager
            .login("a@b.com", "correct horse battery staple", None, None, None)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        manager.logout_all(outcome.user.id).await.unwrap();

        let err = manager.verify_access(&outcome.tokens.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn csrf_secret_unrelated_to_the_session_is_rejected() {
        let manager = test_manager();
        manager
            .register("a@b.com", "alice", "correct horse battery staple", "en-US")
            .await
            .unwrap();
        let outcome = manager
            .login("a@b.com", "correct horse battery staple", None, None, None)
            .await
            .unwrap();

        // A secret the session never issued, even if internally consistent
        // with its own hash, must not satisfy this session's check.
        let unrelated_secret = CsrfSecret::generate();
        let err = manager
            .verify_csrf(
                outcome.tokens.session_id,
                &unrelated_secret,
                &unrelated_secret.hash_hex(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CsrfMismatch));
    }
}
