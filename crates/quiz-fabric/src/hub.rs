use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use quiz_cache::backplane::Backplane;
use quiz_config::WsSettings;
use quiz_models::{events::OutboundMessage, Id};
use tokio::sync::mpsc;

use crate::worker_pool::WorkerPool;
use crate::FabricError;

pub type ConnectionId = Id;

/// Every message a `Hub` relays over the cluster backplane, tagged with the
/// publishing instance so each instance can drop its own echoes (§4.1:
/// "marked with the instance id to prevent loopback").
#[derive(serde::Serialize, serde::Deserialize)]
struct RelayEnvelope {
    origin_instance: Id,
    target: RelayTarget,
    event: OutboundMessage,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
enum RelayTarget {
    User { user_id: Id },
    Quiz { quiz_id: Id },
}

const USER_SEND_CHANNEL: &str = "fabric:user_send";
const QUIZ_BROADCAST_CHANNEL: &str = "fabric:quiz_broadcast";

/// §4.4: "Sends are wrapped in a bounded retry (default 3 attempts at
/// `RetryInterval`) before giving up on a single recipient." The composition
/// root builds this from `SchedulingSettings::max_retries`/`retry_interval_ms`
/// since that's where the rest of the per-question pacing config lives.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
}

struct SessionEntry {
    user_id: Id,
    outbound: mpsc::Sender<OutboundMessage>,
    last_seen: Instant,
}

#[derive(Default)]
struct ShardState {
    sessions: HashMap<ConnectionId, SessionEntry>,
    by_user: HashMap<Id, HashSet<ConnectionId>>,
    by_quiz: HashMap<Id, HashSet<ConnectionId>>,
    subscriptions: HashMap<ConnectionId, HashSet<Id>>,
}

impl ShardState {
    fn remove(&mut self, connection_id: ConnectionId) -> Option<Id> {
        let entry = self.sessions.remove(&connection_id)?;
        if let Some(set) = self.by_user.get_mut(&entry.user_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                self.by_user.remove(&entry.user_id);
            }
        }
        if let Some(quizzes) = self.subscriptions.remove(&connection_id) {
            for quiz_id in quizzes {
                if let Some(set) = self.by_quiz.get_mut(&quiz_id) {
                    set.remove(&connection_id);
                    if set.is_empty() {
                        self.by_quiz.remove(&quiz_id);
                    }
                }
            }
        }
        Some(entry.user_id)
    }
}

/// Handed back to the caller (the WS accept handler in `quiz-api`) on a
/// successful [`Hub::register`]. The receiver is the writer task's source;
/// the fabric itself never touches the socket.
pub struct RegisteredSession {
    pub connection_id: ConnectionId,
    pub outbound: mpsc::Receiver<OutboundMessage>,
}

pub struct Hub {
    shards: Vec<RwLock<ShardState>>,
    backplane: Arc<dyn Backplane>,
    worker_pool: WorkerPool,
    instance_id: Id,
    settings: WsSettings,
    retry: RetryPolicy,
    ip_connections: Mutex<HashMap<IpAddr, usize>>,
}

impl Hub {
    pub fn new(settings: WsSettings, retry: RetryPolicy, backplane: Arc<dyn Backplane>) -> Arc<Self> {
        let shard_count = settings.shard_count.max(1);
        let worker_pool = WorkerPool::new(settings.worker_pool_size);
        let hub = Arc::new(Self {
            shards: (0..shard_count).map(|_| RwLock::new(ShardState::default())).collect(),
            backplane,
            worker_pool,
            instance_id: Id::generate(),
            settings,
            retry,
            ip_connections: Mutex::new(HashMap::new()),
        });
        hub.clone().spawn_backplane_relay();
        hub
    }

    fn shard_of(&self, user_id: Id) -> usize {
        (user_id.as_uuid().as_u128() % self.shards.len() as u128) as usize
    }

    /// §4.1/§6: the inbound frame size cap the reader side enforces. The
    /// socket handshake applies this directly on the upgrade rather than
    /// on each frame, so an oversized frame never reaches the hub at all.
    pub fn max_message_size(&self) -> usize {
        self.settings.max_message_size
    }

    /// §5: socket read idle timeout paired with `pong_wait_s` pings.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.settings.pong_wait_s)
    }

    /// §5: socket write deadline. A send that doesn't complete within this
    /// window is treated the same as a closed sink by the writer task.
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.settings.write_wait_s)
    }

    /// Registers a new session under `user_id`, enforcing the per-IP and
    /// per-shard caps (§4.1). The returned receiver is the writer task's
    /// queue; `outbound_queue_capacity` bounds how far a slow consumer can
    /// fall behind before the session is closed.
    pub fn register(&self, user_id: Id, ip: IpAddr) -> Result<RegisteredSession, FabricError> {
        {
            let mut ip_connections = self.ip_connections.lock().unwrap();
            let count = ip_connections.entry(ip).or_insert(0);
            if *count >= self.settings.max_connections_per_ip {
                return Err(FabricError::IpCapExceeded);
            }
            *count += 1;
        }

        let shard_index = self.shard_of(user_id);
        let mut shard = self.shards[shard_index].write().unwrap();
        if shard.sessions.len() >= self.settings.max_clients_per_shard {
            drop(shard);
            self.release_ip_slot(ip);
            return Err(FabricError::ShardCapExceeded);
        }

        let connection_id = Id::generate();
        let (tx, rx) = mpsc::channel(self.settings.outbound_queue_capacity);
        shard.sessions.insert(
            connection_id,
            SessionEntry {
                user_id,
                outbound: tx,
                last_seen: Instant::now(),
            },
        );
        shard.by_user.entry(user_id).or_default().insert(connection_id);

        metrics::gauge!("quiz_fabric_active_connections", "shard" => shard_index.to_string())
            .set(shard.sessions.len() as f64);
        self.maybe_alert_hot_shard(shard_index, shard.sessions.len());

        Ok(RegisteredSession {
            connection_id,
            outbound: rx,
        })
    }

    fn release_ip_slot(&self, ip: IpAddr) {
        let mut ip_connections = self.ip_connections.lock().unwrap();
        if let Some(count) = ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                ip_connections.remove(&ip);
            }
        }
    }

    /// Removes the session from its shard and every subscription set.
    /// Idempotent: unregistering an unknown or already-removed connection
    /// is a no-op.
    pub fn unregister(&self, connection_id: ConnectionId, user_id: Id, ip: IpAddr) {
        let shard_index = self.shard_of(user_id);
        let mut shard = self.shards[shard_index].write().unwrap();
        if shard.remove(connection_id).is_some() {
            metrics::gauge!("quiz_fabric_active_connections", "shard" => shard_index.to_string())
                .set(shard.sessions.len() as f64);
        }
        drop(shard);
        self.release_ip_slot(ip);
    }

    pub fn subscribe_to_quiz(&self, connection_id: ConnectionId, user_id: Id, quiz_id: Id) {
        let shard_index = self.shard_of(user_id);
        let mut shard = self.shards[shard_index].write().unwrap();
        if !shard.sessions.contains_key(&connection_id) {
            return;
        }
        shard.by_quiz.entry(quiz_id).or_default().insert(connection_id);
        shard.subscriptions.entry(connection_id).or_default().insert(quiz_id);
    }

    pub fn unsubscribe_all(&self, connection_id: ConnectionId, user_id: Id) {
        let shard_index = self.shard_of(user_id);
        let mut shard = self.shards[shard_index].write().unwrap();
        if let Some(quizzes) = shard.subscriptions.remove(&connection_id) {
            for quiz_id in quizzes {
                if let Some(set) = shard.by_quiz.get_mut(&quiz_id) {
                    set.remove(&connection_id);
                    if set.is_empty() {
                        shard.by_quiz.remove(&quiz_id);
                    }
                }
            }
        }
    }

    /// Bumps the session's idle clock; called on every inbound frame
    /// (including heartbeats) so [`Hub::sweep_idle`] doesn't treat a quiet
    /// but live connection as dead.
    pub fn touch(&self, connection_id: ConnectionId, user_id: Id) {
        let shard_index = self.shard_of(user_id);
        let mut shard = self.shards[shard_index].write().unwrap();
        if let Some(entry) = shard.sessions.get_mut(&connection_id) {
            entry.last_seen = Instant::now();
        }
    }

    /// Unregisters every session across all shards that has gone quiet for
    /// longer than `pong_wait`, returning `(connection_id, user_id)` pairs so
    /// the caller can close the underlying sockets. Call this on a fixed
    /// tick from the composition root.
    pub fn sweep_idle(&self, pong_wait: Duration) -> Vec<(ConnectionId, Id)> {
        let mut expired = Vec::new();
        for (shard_index, shard_lock) in self.shards.iter().enumerate() {
            let mut shard = shard_lock.write().unwrap();
            let stale: Vec<ConnectionId> = shard
                .sessions
                .iter()
                .filter(|(_, entry)| entry.last_seen.elapsed() > pong_wait)
                .map(|(id, _)| *id)
                .collect();
            for connection_id in stale {
                if let Some(user_id) = shard.remove(connection_id) {
                    expired.push((connection_id, user_id));
                }
            }
            metrics::gauge!("quiz_fabric_active_connections", "shard" => shard_index.to_string())
                .set(shard.sessions.len() as f64);
        }
        expired
    }

    /// Delivers to every local session of `user_id`, then republishes so
    /// sibling instances holding other sessions of the same user can
    /// deliver locally too.
    pub async fn send_to_user(&self, user_id: Id, event: OutboundMessage) {
        self.deliver_local_to_user(user_id, &event).await;

        let envelope = RelayEnvelope {
            origin_instance: self.instance_id,
            target: RelayTarget::User { user_id },
            event,
        };
        if let Ok(payload) = serde_json::to_vec(&envelope) {
            if let Err(err) = self.backplane.publish(USER_SEND_CHANNEL, &payload).await {
                tracing::warn!(?err, "failed to publish user-send event to backplane");
            }
        }
    }

    async fn deliver_local_to_user(&self, user_id: Id, event: &OutboundMessage) {
        let shard_index = self.shard_of(user_id);
        let connections = {
            let shard = self.shards[shard_index].read().unwrap();
            shard.by_user.get(&user_id).cloned().unwrap_or_default()
        };
        if connections.is_empty() {
            return;
        }
        self.send_with_retry(shard_index, connections, event).await;
    }

    /// First attempt is immediate; a queue reported `Full` gets up to
    /// `retry.max_retries` further attempts spaced `retry.retry_interval`
    /// apart before the session is declared a slow consumer and evicted. A
    /// queue reported `Closed` (receiver already dropped) is evicted right
    /// away since no amount of waiting will fix that.
    async fn send_with_retry(&self, shard_index: usize, connections: HashSet<ConnectionId>, event: &OutboundMessage) {
        let mut to_evict = Vec::new();
        let mut pending = Vec::new();
        {
            let shard = self.shards[shard_index].read().unwrap();
            for connection_id in connections {
                let Some(entry) = shard.sessions.get(&connection_id) else {
                    continue;
                };
                match entry.outbound.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        pending.push((connection_id, entry.outbound.clone()))
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => to_evict.push(connection_id),
                }
            }
        }

        for _ in 0..self.retry.max_retries {
            if pending.is_empty() {
                break;
            }
            tokio::time::sleep(self.retry.retry_interval).await;
            let mut still_pending = Vec::new();
            for (connection_id, sender) in pending {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => still_pending.push((connection_id, sender)),
                    Err(mpsc::error::TrySendError::Closed(_)) => to_evict.push(connection_id),
                }
            }
            pending = still_pending;
        }
        to_evict.extend(pending.into_iter().map(|(connection_id, _)| connection_id));

        if to_evict.is_empty() {
            return;
        }
        let mut shard = self.shards[shard_index].write().unwrap();
        let evicted = to_evict.len();
        for connection_id in to_evict {
            shard.remove(connection_id);
        }
        metrics::counter!("quiz_fabric_connection_errors_total").increment(evicted as u64);
    }

    /// Fans `event` out to every local subscriber of `quiz_id` via the
    /// worker pool (so one slow socket never blocks another shard's
    /// delivery), then republishes to sibling instances.
    pub async fn broadcast_to_quiz(self: &Arc<Self>, quiz_id: Id, event: OutboundMessage) {
        self.broadcast_local_to_quiz(quiz_id, event.clone()).await;

        let envelope = RelayEnvelope {
            origin_instance: self.instance_id,
            target: RelayTarget::Quiz { quiz_id },
            event,
        };
        if let Ok(payload) = serde_json::to_vec(&envelope) {
            if let Err(err) = self.backplane.publish(QUIZ_BROADCAST_CHANNEL, &payload).await {
                tracing::warn!(?err, "failed to publish quiz broadcast to backplane");
            }
        }
    }

    async fn broadcast_local_to_quiz(self: &Arc<Self>, quiz_id: Id, event: OutboundMessage) {
        for shard_index in 0..self.shards.len() {
            let hub = self.clone();
            let event = event.clone();
            let submitted = self
                .worker_pool
                .submit(async move {
                    hub.deliver_local_shard_quiz(shard_index, quiz_id, &event).await;
                })
                .await;
            if submitted.is_err() {
                tracing::warn!("worker pool rejected quiz broadcast submission during shutdown");
            }
        }
    }

    async fn deliver_local_shard_quiz(&self, shard_index: usize, quiz_id: Id, event: &OutboundMessage) {
        let connections = {
            let shard = self.shards[shard_index].read().unwrap();
            shard.by_quiz.get(&quiz_id).cloned().unwrap_or_default()
        };
        if connections.is_empty() {
            return;
        }
        self.send_with_retry(shard_index, connections, event).await;
    }

    /// The user ids subscribed to `quiz_id` on this instance only. The
    /// cluster-wide count is the cache's durable participants set
    /// (`QuizCache::participants`), which `quiz-runtime` consults directly.
    pub fn active_subscribers_local(&self, quiz_id: Id) -> HashSet<Id> {
        let mut users = HashSet::new();
        for shard_lock in &self.shards {
            let shard = shard_lock.read().unwrap();
            if let Some(connections) = shard.by_quiz.get(&quiz_id) {
                for connection_id in connections {
                    if let Some(entry) = shard.sessions.get(connection_id) {
                        users.insert(entry.user_id);
                    }
                }
            }
        }
        users
    }

    fn maybe_alert_hot_shard(&self, shard_index: usize, load: usize) {
        let fraction = load as f64 / self.settings.max_clients_per_shard as f64;
        if fraction >= self.settings.hot_shard_load_fraction {
            tracing::warn!(shard_index, load, fraction, "hot shard: load fraction exceeded");
        }
    }

    pub async fn shutdown(&self) {
        self.worker_pool.shutdown(self.settings.worker_pool_size).await;
    }

    fn spawn_backplane_relay(self: Arc<Self>) {
        let hub = self.clone();
        tokio::spawn(async move {
            let Ok(mut rx) = hub.backplane.subscribe(USER_SEND_CHANNEL).await else {
                tracing::error!("failed to subscribe to user-send backplane channel");
                return;
            };
            while let Ok(payload) = rx.recv().await {
                let Ok(envelope) = serde_json::from_slice::<RelayEnvelope>(&payload) else {
                    continue;
                };
                if envelope.origin_instance == hub.instance_id {
                    continue;
                }
                if let RelayTarget::User { user_id } = envelope.target {
                    hub.deliver_local_to_user(user_id, &envelope.event).await;
                }
            }
        });

        let hub = self.clone();
        tokio::spawn(async move {
            let Ok(mut rx) = hub.backplane.subscribe(QUIZ_BROADCAST_CHANNEL).await else {
                tracing::error!("failed to subscribe to quiz-broadcast backplane channel");
                return;
            };
            while let Ok(payload) = rx.recv().await {
                let Ok(envelope) = serde_json::from_slice::<RelayEnvelope>(&payload) else {
                    continue;
                };
                if envelope.origin_instance == hub.instance_id {
                    continue;
                }
                if let RelayTarget::Quiz { quiz_id } = envelope.target {
                    hub.broadcast_local_to_quiz(quiz_id, envelope.event).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_cache::backplane::InMemoryBackplane;

    fn test_settings() -> WsSettings {
        WsSettings {
            shard_count: 2,
            max_clients_per_shard: 4,
            max_message_size: 4096,
            write_wait_s: 10,
            pong_wait_s: 60,
            outbound_queue_capacity: 4,
            max_connections_per_ip: 2,
            hot_shard_load_fraction: 0.85,
            worker_pool_size: 4,
        }
    }

    fn loopback() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    fn test_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            retry_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn register_and_send_to_user_delivers_locally() {
        let hub = Hub::new(test_settings(), test_retry(), Arc::new(InMemoryBackplane::new()));
        let user_id = Id::generate();
        let mut registered = hub.register(user_id, loopback()).unwrap();

        hub.send_to_user(user_id, OutboundMessage::ServerHeartbeat).await;

        let received = registered.outbound.try_recv().unwrap();
        assert!(matches!(received, OutboundMessage::ServerHeartbeat));
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let hub = Hub::new(test_settings(), test_retry(), Arc::new(InMemoryBackplane::new()));
        let user_id = Id::generate();
        let registered = hub.register(user_id, loopback()).unwrap();
        hub.unregister(registered.connection_id, user_id, loopback());

        hub.send_to_user(user_id, OutboundMessage::ServerHeartbeat).await;
        // No receiver left to assert against; re-registering confirms the
        // shard's bookkeeping was actually cleared rather than merely hidden.
        let second = hub.register(user_id, loopback()).unwrap();
        assert_ne!(second.connection_id, registered.connection_id);
    }

    #[tokio::test]
    async fn broadcast_to_quiz_reaches_subscribers_only() {
        let hub = Hub::new(test_settings(), test_retry(), Arc::new(InMemoryBackplane::new()));
        let (subscriber, bystander) = (Id::generate(), Id::generate());
        let mut sub_session = hub.register(subscriber, loopback()).unwrap();
        let mut bystander_session = hub.register(bystander, loopback()).unwrap();

        let quiz_id = Id::generate();
        hub.subscribe_to_quiz(sub_session.connection_id, subscriber, quiz_id);

        hub.broadcast_to_quiz(quiz_id, OutboundMessage::QuizFinish { quiz_id }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(sub_session.outbound.try_recv().is_ok());
        assert!(bystander_session.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_ip_cap_is_enforced() {
        let hub = Hub::new(test_settings(), test_retry(), Arc::new(InMemoryBackplane::new()));
        let _a = hub.register(Id::generate(), loopback()).unwrap();
        let _b = hub.register(Id::generate(), loopback()).unwrap();
        let result = hub.register(Id::generate(), loopback());
        assert!(matches!(result, Err(FabricError::IpCapExceeded)));
    }

    #[tokio::test]
    async fn sweep_idle_evicts_stale_sessions() {
        let hub = Hub::new(test_settings(), test_retry(), Arc::new(InMemoryBackplane::new()));
        let user_id = Id::generate();
        let registered = hub.register(user_id, loopback()).unwrap();

        let expired = hub.sweep_idle(Duration::from_millis(0));
        assert_eq!(expired, vec![(registered.connection_id, user_id)]);
    }
}
