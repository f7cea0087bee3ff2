//! The signing-key rotation background task (§4.8): on a schedule, mints
//! a new active key, flips the previous active key to inactive with
//! `rotated_at`, and prunes keys whose verification grace window has
//! elapsed. Uses the same `tokio::select!`-against-cancellation idiom
//! `automations::server::serve` uses for its own polling loop, simplified
//! here to a single `tokio::time::interval`.

use std::sync::Arc;

use quiz_repo::AuthRepo;
use rand::RngCore;

use crate::key_crypto::MasterKey;

pub struct KeyRotationTask<R: AuthRepo> {
    repo: Arc<R>,
    master_key: Arc<MasterKey>,
    rotation_interval: std::time::Duration,
}

impl<R: AuthRepo + 'static> KeyRotationTask<R> {
    pub fn new(
        repo: Arc<R>,
        master_key: Arc<MasterKey>,
        rotation_interval: std::time::Duration,
    ) -> Self {
        Self {
            repo,
            master_key,
            rotation_interval,
        }
    }

    /// Runs until `shutdown` resolves. Spawned once at startup by the
    /// composition root.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.rotation_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.rotate_once().await {
                        tracing::error!(?err, "signing key rotation failed, will retry next tick");
                    }
                }
                () = &mut shutdown => {
                    tracing::info!("key rotation task signaled to stop");
                    return;
                }
            }
        }
    }

    pub async fn rotate_once(&self) -> anyhow::Result<()> {
        let previous_active = self.repo.active_jwt_key().await?;

        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let (encrypted_secret, nonce) = self
            .master_key
            .encrypt(&secret)
            .map_err(|err| anyhow::anyhow!("failed to encrypt new signing key: {err}"))?;

        let new_key = quiz_models::JwtKey {
            kid: uuid::Uuid::new_v4().to_string(),
            encrypted_secret,
            nonce,
            algorithm: "HS256".to_string(),
            is_active: true,
            expires_at: chrono::Utc::now() + chrono::Duration::days(60),
            rotated_at: None,
        };
        self.repo.insert_jwt_key(&new_key).await?;

        if let Some(previous) = previous_active {
            self.repo.deactivate_jwt_key(&previous.kid).await?;
            tracing::info!(new_kid = %new_key.kid, old_kid = %previous.kid, "rotated signing key");
        } else {
            tracing::info!(new_kid = %new_key.kid, "bootstrapped first signing key");
        }

        let pruned = self.repo.prune_expired_jwt_keys().await?;
        if pruned > 0 {
            tracing::debug!(pruned, "pruned signing keys past their grace window");
        }

        Ok(())
    }
}
