//! Deadline-bounded wrapper around any [`SharedStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{SharedStore, StoreError, StoreResult, Subscription};

/// Bounds every call on the inner store by `deadline`.  A call that
/// overruns returns [`StoreError::Timeout`]; nothing is retried.
pub struct TimeoutStore {
    inner: Arc<dyn SharedStore>,
    deadline: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn SharedStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, deadline_ms = self.deadline.as_millis() as u64, "store call timed out");
                Err(StoreError::Timeout {
                    op,
                    after_ms: self.deadline.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl SharedStore for TimeoutStore {
    async fn ping(&self) -> StoreResult<()> {
        self.bounded("ping", self.inner.ping()).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.bounded("set", self.inner.set(key, value, ttl)).await
    }

    async fn set_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<bool> {
        self.bounded("set_nx", self.inner.set_nx(key, value, ttl)).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.bounded("exists", self.inner.exists(key)).await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.bounded("del", self.inner.del(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.bounded("expire", self.inner.expire(key, ttl)).await
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.bounded("sadd", self.inner.sadd(key, member)).await
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.bounded("srem", self.inner.srem(key, member)).await
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.bounded("smembers", self.inner.smembers(key)).await
    }

    async fn lpush(&self, key: &str, value: String) -> StoreResult<usize> {
        self.bounded("lpush", self.inner.lpush(key, value)).await
    }

    async fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()> {
        self.bounded("ltrim", self.inner.ltrim(key, keep)).await
    }

    async fn lrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        self.bounded("lrange", self.inner.lrange(key, limit)).await
    }

    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize> {
        self.bounded("publish", self.inner.publish(channel, payload)).await
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        self.bounded("subscribe", self.inner.subscribe(channel)).await
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        self.bounded("purge_expired", self.inner.purge_expired()).await
    }
}
