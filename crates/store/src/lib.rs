//! Shared key/value + pub/sub substrate used for cross-process session
//! state and event fan-out.
//!
//! [`SharedStore`] is the seam: the coordinator only ever talks to the
//! trait.  [`MemoryStore`] is the in-process implementation with
//! Redis-like semantics (per-key TTL, sets, capped lists, broadcast
//! channels).  [`TimeoutStore`] wraps any store so every call is bounded
//! by a deadline.

pub mod memory;
pub mod timeout;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use memory::MemoryStore;
pub use timeout::TimeoutStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store operation `{op}` timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },

    #[error("key `{0}` holds a value of the wrong type")]
    WrongType(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store is closed")]
    Closed,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for leitl_domain::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Timeout { .. } => leitl_domain::Error::Timeout(e.to_string()),
            other => leitl_domain::Error::Store(other.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A live pub/sub subscription.  Yields payloads in publish order; a slow
/// subscriber that falls behind skips the overflowed messages.
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: broadcast::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    /// Next payload, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SharedStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Key/value, set, list and pub/sub operations.  Each call is atomic per
/// key; callers needing read-modify-write across calls serialize
/// themselves.
///
/// Lists are head-first: `lpush` inserts at index 0, `ltrim(key, n)` keeps
/// the first `n` entries and `lrange(key, n)` returns them.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Cheap liveness check used at startup.
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;
    /// Set only if the key does not exist.  Returns `true` if written.
    async fn set_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<bool>;
    async fn exists(&self, key: &str) -> StoreResult<bool>;
    /// Returns `true` if the key existed.
    async fn del(&self, key: &str) -> StoreResult<bool>;
    /// Returns `true` if the key existed and now carries `ttl`.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Returns `true` if the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;
    /// Returns `true` if the member was present.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Returns the list length after the push.
    async fn lpush(&self, key: &str, value: String) -> StoreResult<usize>;
    async fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()>;
    async fn lrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>>;

    /// Returns the number of subscribers that received the payload.
    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize>;
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;

    /// Reclaim keys whose TTL has passed.  Backends that expire keys on
    /// their own keep the default no-op.  Returns how many were removed.
    async fn purge_expired(&self) -> StoreResult<usize> {
        Ok(0)
    }
}
