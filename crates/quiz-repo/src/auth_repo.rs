use async_trait::async_trait;
use quiz_errors::AppError;
use quiz_models::{Id, InvalidationMark, JwtKey, RefreshToken};

use crate::PgPool;

#[async_trait]
pub trait AuthRepo: Send + Sync {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError>;

    /// Looks up an active (non-expired, non-revoked) refresh token by the
    /// hash of the presented opaque string.
    async fn find_active_refresh_token(
        &self,
        token_hash: [u8; 32],
    ) -> Result<Option<RefreshToken>, AppError>;

    async fn revoke_refresh_token(&self, id: Id, reason: &str) -> Result<(), AppError>;

    /// Every non-revoked, non-expired token for a user, oldest first — used
    /// by the session-cap eviction in §4.8.
    async fn list_active_refresh_tokens(&self, user_id: Id) -> Result<Vec<RefreshToken>, AppError>;

    async fn revoke_all_for_user(&self, user_id: Id, reason: &str) -> Result<(), AppError>;

    async fn insert_jwt_key(&self, key: &JwtKey) -> Result<(), AppError>;
    async fn active_jwt_key(&self) -> Result<Option<JwtKey>, AppError>;

    /// Every key still inside the verification grace window, active or not.
    async fn verification_window_keys(&self) -> Result<Vec<JwtKey>, AppError>;

    async fn deactivate_jwt_key(&self, kid: &str) -> Result<(), AppError>;
    async fn prune_expired_jwt_keys(&self) -> Result<u64, AppError>;

    async fn set_invalidation_mark(&self, mark: InvalidationMark) -> Result<(), AppError>;
    async fn invalidation_mark(&self, user_id: Id) -> Result<Option<InvalidationMark>, AppError>;
}

pub struct PgAuthRepo {
    pool: PgPool,
}

impl PgAuthRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthRepo for PgAuthRepo {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        sqlx::query!(
            r#"
            INSERT INTO refresh_tokens
                (id, user_id, token_hash, device_id, ip, user_agent, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            token.id.as_uuid(),
            token.user_id.as_uuid(),
            &token.token_hash,
            token.device_id,
            token.ip,
            token.user_agent,
            token.expires_at,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_refresh_token(
        &self,
        token_hash: [u8; 32],
    ) -> Result<Option<RefreshToken>, AppError> {
        struct Row {
            id: Id,
            user_id: Id,
            token_hash: Vec<u8>,
            device_id: Option<String>,
            ip: Option<String>,
            user_agent: Option<String>,
            expires_at: chrono::DateTime<chrono::Utc>,
            revoked_at: Option<chrono::DateTime<chrono::Utc>>,
            revoked_reason: Option<String>,
        }

        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                id as "id: Id",
                user_id as "user_id: Id",
                token_hash,
                device_id,
                ip,
                user_agent,
                expires_at,
                revoked_at,
                revoked_reason
            FROM refresh_tokens
            WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > now()
            "#,
            &token_hash[..],
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| RefreshToken {
            id: row.id,
            user_id: row.user_id,
            token_hash: row
                .token_hash
                .try_into()
                .unwrap_or([0u8; 32]),
            device_id: row.device_id,
            ip: row.ip,
            user_agent: row.user_agent,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            revoked_reason: row.revoked_reason,
        }))
    }

    async fn revoke_refresh_token(&self, id: Id, reason: &str) -> Result<(), AppError> {
        sqlx::query!(
            r#"
            UPDATE refresh_tokens
            SET expires_at = now(), revoked_at = now(), revoked_reason = $2
            WHERE id = $1 AND revoked_at IS NULL
            "#,
            id.as_uuid(),
            reason,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_active_refresh_tokens(
        &self,
        user_id: Id,
    ) -> Result<Vec<RefreshToken>, AppError> {
        struct Row {
            id: Id,
            user_id: Id,
            token_hash: Vec<u8>,
            device_id: Option<String>,
            ip: Option<String>,
            user_agent: Option<String>,
            expires_at: chrono::DateTime<chrono::Utc>,
            revoked_at: Option<chrono::DateTime<chrono::Utc>>,
            revoked_reason: Option<String>,
        }

        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                id as "id: Id",
                user_id as "user_id: Id",
                token_hash,
                device_id,
                ip,
                user_agent,
                expires_at,
                revoked_at,
                revoked_reason
            FROM refresh_tokens
            WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > now()
            ORDER BY expires_at ASC
            "#,
            user_id.as_uuid(),
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RefreshToken {
                id: row.id,
                user_id: row.user_id,
                token_hash: row.token_hash.try_into().unwrap_or([0u8; 32]),
                device_id: row.device_id,
                ip: row.ip,
                user_agent: row.user_agent,
                expires_at: row.expires_at,
                revoked_at: row.revoked_at,
                revoked_reason: row.revoked_reason,
            })
            .collect())
    }

    async fn revoke_all_for_user(&self, user_id: Id, reason: &str) -> Result<(), AppError> {
        sqlx::query!(
            r#"
            UPDATE refresh_tokens
            SET expires_at = now(), revoked_at = now(), revoked_reason = $2
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
            user_id.as_uuid(),
            reason,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_jwt_key(&self, key: &JwtKey) -> Result<(), AppError> {
        sqlx::query!(
            r#"
            INSERT INTO jwt_keys (kid, encrypted_secret, nonce, algorithm, is_active, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            key.kid,
            key.encrypted_secret,
            &key.nonce,
            key.algorithm,
            key.is_active,
            key.expires_at,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_jwt_key(&self) -> Result<Option<JwtKey>, AppError> {
        let row = jwt_key_row(&self.pool, "is_active = true").await?;
        Ok(row.into_iter().next())
    }

    async fn verification_window_keys(&self) -> Result<Vec<JwtKey>, AppError> {
        jwt_key_row(&self.pool, "expires_at > now()").await
    }

    async fn deactivate_jwt_key(&self, kid: &str) -> Result<(), AppError> {
        sqlx::query!(
            "UPDATE jwt_keys SET is_active = false, rotated_at = now() WHERE kid = $1",
            kid,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_expired_jwt_keys(&self) -> Result<u64, AppError> {
        let result = sqlx::query!(
            "DELETE FROM jwt_keys WHERE is_active = false AND expires_at < now()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_invalidation_mark(&self, mark: InvalidationMark) -> Result<(), AppError> {
        sqlx::query!(
            r#"
            INSERT INTO invalidation_marks (user_id, cutoff)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET cutoff = EXCLUDED.cutoff
            "#,
            mark.user_id.as_uuid(),
            mark.cutoff,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidation_mark(&self, user_id: Id) -> Result<Option<InvalidationMark>, AppError> {
        struct Row {
            user_id: Id,
            cutoff: chrono::DateTime<chrono::Utc>,
        }
        let row = sqlx::query_as!(
            Row,
            r#"SELECT user_id as "user_id: Id", cutoff FROM invalidation_marks WHERE user_id = $1"#,
            user_id.as_uuid(),
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| InvalidationMark {
            user_id: row.user_id,
            cutoff: row.cutoff,
        }))
    }
}

async fn jwt_key_row(pool: &PgPool, predicate: &str) -> Result<Vec<JwtKey>, AppError> {
    #[derive(sqlx::FromRow)]
    struct Row {
        kid: String,
        encrypted_secret: Vec<u8>,
        nonce: Vec<u8>,
        algorithm: String,
        is_active: bool,
        expires_at: chrono::DateTime<chrono::Utc>,
        rotated_at: Option<chrono::DateTime<chrono::Utc>>,
    }

    let query = format!(
        r#"SELECT kid, encrypted_secret, nonce, algorithm, is_active, expires_at, rotated_at
           FROM jwt_keys WHERE {predicate}"#
    );
    let rows: Vec<Row> = sqlx::query_as(&query).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|row| JwtKey {
            kid: row.kid,
            encrypted_secret: row.encrypted_secret,
            nonce: row.nonce.try_into().unwrap_or([0u8; 12]),
            algorithm: row.algorithm,
            is_active: row.is_active,
            expires_at: row.expires_at,
            rotated_at: row.rotated_at,
        })
        .collect())
}
