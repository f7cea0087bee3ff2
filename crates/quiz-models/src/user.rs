use crate::Id;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub username: String,
    /// Argon2 PHC string; never the plaintext password.
    pub password_hash: String,
    pub locale: String,
    pub games_played: i64,
    pub total_score: i64,
    pub wins_count: i64,
    pub total_prize_won: i64,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}
