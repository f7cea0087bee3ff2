use async_trait::async_trait;
use quiz_errors::{AppError, ConflictKind};
use quiz_models::{Id, User};

use crate::PgPool;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
        locale: &str,
    ) -> Result<User, AppError>;

    async fn find_by_id(&self, id: Id) -> Result<Option<User>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn update_password_hash(&self, id: Id, password_hash: &str) -> Result<(), AppError>;

    /// Soft-deletes the account; associated rows are left in place and
    /// cascade per the storage layer's foreign keys.
    async fn soft_delete(&self, id: Id) -> Result<(), AppError>;
}

pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AppError::Conflict(ConflictKind::UniqueViolation);
        }
    }
    err.into()
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
        locale: &str,
    ) -> Result<User, AppError> {
        sqlx::query_as!(
            User,
            r#"
            INSERT INTO users (id, email, username, password_hash, locale)
            VALUES (gen_random_uuid(), $1, $2, $3, $4)
            RETURNING
                id as "id: Id",
                email,
                username,
                password_hash,
                locale,
                games_played,
                total_score,
                wins_count,
                total_prize_won,
                deleted_at
            "#,
            email,
            username,
            password_hash,
            locale,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error)
    }

    async fn find_by_id(&self, id: Id) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as!(
            User,
            r#"
            SELECT
                id as "id: Id",
                email,
                username,
                password_hash,
                locale,
                games_played,
                total_score,
                wins_count,
                total_prize_won,
                deleted_at
            FROM users
            WHERE id = $1
            "#,
            id.as_uuid(),
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as!(
            User,
            r#"
            SELECT
                id as "id: Id",
                email,
                username,
                password_hash,
                locale,
                games_played,
                total_score,
                wins_count,
                total_prize_won,
                deleted_at
            FROM users
            WHERE email = $1
            "#,
            email,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_password_hash(&self, id: Id, password_hash: &str) -> Result<(), AppError> {
        sqlx::query!(
            "UPDATE users SET password_hash = $1 WHERE id = $2",
            password_hash,
            id.as_uuid(),
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn soft_delete(&self, id: Id) -> Result<(), AppError> {
        sqlx::query!(
            "UPDATE users SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
            id.as_uuid(),
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
