//! The sharded connection fabric of §4.1: per-shard session maps behind a
//! reader-writer lock, a bounded per-session outbound queue with
//! close-on-full backpressure, and a cluster pub/sub relay so a deployment
//! of several instances behaves as one hub. Grounded in
//! `crates/automations::server`'s semaphore-gated worker dispatch for the
//! broadcast fan-out, generalized from a task queue to a fixed-size pool of
//! socket-send workers.

pub mod hub;
pub mod worker_pool;

pub use hub::{ConnectionId, Hub, RegisteredSession, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("per-ip connection cap exceeded")]
    IpCapExceeded,
    #[error("shard connection cap exceeded")]
    ShardCapExceeded,
    #[error("session's outbound queue is full, closing as a slow consumer")]
    SlowConsumer,
    #[error("cluster backplane unavailable: {0}")]
    Backplane(#[from] quiz_cache::CacheError),
}
