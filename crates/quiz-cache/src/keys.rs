//! Cache key formatting and the TTLs each key family uses. Centralized so
//! that the redis and in-memory implementations agree on both.

use quiz_models::Id;

pub const PASS_RATE_TTL_SECS: u64 = 24 * 3_600;
pub const ELIMINATED_TTL_SECS: u64 = 24 * 3_600;
pub const ANSWERED_TTL_SECS: u64 = 3_600;
pub const CSRF_SECRET_TTL_SECS: u64 = 30 * 24 * 3_600;

pub fn total_key(quiz_id: Id, position: u32) -> String {
    format!("quiz:{quiz_id}:q:{position}:total")
}

pub fn passed_key(quiz_id: Id, position: u32) -> String {
    format!("quiz:{quiz_id}:q:{position}:passed")
}

pub fn eliminated_key(quiz_id: Id, user_id: Id) -> String {
    format!("quiz:{quiz_id}:eliminated:{user_id}")
}

pub fn answered_key(quiz_id: Id, user_id: Id, question_id: Id) -> String {
    format!("quiz:{quiz_id}:answered:{user_id}:{question_id}")
}

pub fn participants_key(quiz_id: Id) -> String {
    format!("quiz:participants:{quiz_id}")
}

pub fn csrf_secret_key(session_id: Id) -> String {
    format!("auth:csrf:{session_id}")
}

pub fn invalidation_mark_key(user_id: Id) -> String {
    format!("auth:invalidation:{user_id}")
}
