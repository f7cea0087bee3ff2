//! Grounded in `crates/control::routes::health_check`: a bare liveness
//! probe, no dependency checks. Load balancers and orchestrators hit this,
//! not operators, so it stays intentionally dumb.

use chrono::Utc;

pub async fn health_check() -> String {
    format!("{}", Utc::now())
}
