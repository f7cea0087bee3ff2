//! The cluster fan-out backplane. A `Backplane` lets one server instance
//! publish a message to a named channel and have every other instance's
//! subscribers observe it — used for cache invalidation-mark fanout here,
//! and by the connection fabric to forward quiz broadcasts across
//! instances when a quiz's subscribers are spread over more than one node.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;

use crate::CacheError;

#[async_trait]
pub trait Backplane: Send + Sync {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), CacheError>;

    /// Subscribes to a channel, returning a receiver that yields every
    /// payload published to it from this point on (not a replay).
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Vec<u8>>, CacheError>;
}

/// Redis pub/sub backed implementation. Each `subscribe` call opens its own
/// dedicated pub/sub connection (Redis multiplexes subscriptions poorly
/// over a shared `ConnectionManager`) and bridges messages onto a
/// `tokio::sync::broadcast` channel so callers get a cheap, cloneable
/// receiver.
pub struct RedisBackplane {
    client: redis::Client,
    publish_conn: ConnectionManager,
}

impl RedisBackplane {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|err| CacheError::Unavailable(err.to_string()))?;
        let publish_conn = client
            .get_connection_manager()
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            publish_conn,
        })
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), CacheError> {
        let mut conn = self.publish_conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Vec<u8>>, CacheError> {
        let pubsub_conn = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        let (tx, rx) = broadcast::channel(256);

        let channel = channel.to_owned();
        tokio::spawn(async move {
            let mut pubsub_conn = pubsub_conn;
            if pubsub_conn.subscribe(&channel).await.is_err() {
                return;
            }
            let mut stream = pubsub_conn.on_message();
            while let Some(msg) = stream.next().await {
                if let Ok(payload) = msg.get_payload::<Vec<u8>>() {
                    if tx.send(payload).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// No-op fan-out used by tests and single-instance deployments: publishing
/// loops a copy of the payload back to every subscriber registered on the
/// same process, with no external dependency.
#[derive(Default)]
pub struct InMemoryBackplane {
    channels: std::sync::Mutex<std::collections::HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl InMemoryBackplane {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl Backplane for InMemoryBackplane {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), CacheError> {
        let _ = self.sender_for(channel).send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Vec<u8>>, CacheError> {
        Ok(self.sender_for(channel).subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_backplane_delivers_to_subscriber() {
        let backplane = InMemoryBackplane::new();
        let mut rx = backplane.subscribe("quiz:fanout").await.unwrap();
        backplane.publish("quiz:fanout", b"hello").await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn in_memory_backplane_channels_are_isolated() {
        let backplane = InMemoryBackplane::new();
        let mut rx_a = backplane.subscribe("a").await.unwrap();
        backplane.publish("b", b"for-b").await.unwrap();
        assert!(rx_a.try_recv().is_err());
    }
}
