//! Event bus: shared pub/sub, bounded logs, local fan-out and the relay
//! of events published by other coordinator instances.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use leitl_domain::config::{EventsConfig, StoreConfig};
use leitl_domain::trace::TraceEvent;
use leitl_protocol::{Event, EventData, OutboundMessage, PubSubEnvelope};
use leitl_store::{SharedStore, StoreResult};

use super::hub::ConnectionHub;
use super::Keys;

pub struct EventBus {
    store: Arc<dyn SharedStore>,
    hub: Arc<ConnectionHub>,
    /// Identifies this instance on the shared channel.
    origin: String,
    channel: String,
    keys: Keys,
    recent_capacity: usize,
    activity_capacity: usize,
    activity_ttl: Duration,
    activity_max_limit: usize,
    /// Held for the whole of a broadcast so every connection sees events
    /// in call order.
    publish_lock: AsyncMutex<()>,
}

impl EventBus {
    pub fn new(
        store: Arc<dyn SharedStore>,
        hub: Arc<ConnectionHub>,
        origin: String,
        store_cfg: &StoreConfig,
        cfg: &EventsConfig,
    ) -> Self {
        Self {
            store,
            hub,
            origin,
            channel: store_cfg.channel.clone(),
            keys: Keys::new(&store_cfg.key_prefix),
            recent_capacity: cfg.recent_capacity.max(1),
            activity_capacity: cfg.activity_capacity.max(1),
            activity_ttl: cfg.activity_ttl(),
            activity_max_limit: cfg.activity_max_limit.max(1),
            publish_lock: AsyncMutex::new(()),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Build an event and deliver it everywhere: the shared channel, both
    /// logs and every local connection.  Store failures are logged and do
    /// not stop local delivery.
    pub async fn broadcast(&self, event_type: &str, session_id: &str, data: EventData) -> Event {
        let event = Event::new(event_type, session_id, data);
        let _order = self.publish_lock.lock().await;

        let envelope = PubSubEnvelope {
            origin: self.origin.clone(),
            event: event.clone(),
        };
        match serde_json::to_string(&envelope) {
            Ok(payload) => {
                if let Err(e) = self.store.publish(&self.channel, payload).await {
                    tracing::warn!(channel = %self.channel, error = %e, "pub/sub publish failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "event envelope serialization failed"),
        }

        if let Err(e) = self.append_logs(&event).await {
            tracing::warn!(event_type, error = %e, "event log update failed");
        }

        let report = self.hub.fan_out(&OutboundMessage::Event(event.clone()));
        TraceEvent::EventBroadcast {
            event_type: event.event_type.clone(),
            session_id: event.session_id.clone(),
            delivered: report.delivered,
            dropped: report.dropped,
        }
        .emit();

        event
    }

    async fn append_logs(&self, event: &Event) -> StoreResult<()> {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "event serialization failed");
                return Ok(());
            }
        };

        let recent = self.keys.recent_messages();
        self.store.lpush(&recent, json.clone()).await?;
        self.store.ltrim(&recent, self.recent_capacity).await?;

        let activity = self.keys.activity_log();
        self.store.lpush(&activity, json).await?;
        self.store.ltrim(&activity, self.activity_capacity).await?;
        self.store.expire(&activity, self.activity_ttl).await?;
        Ok(())
    }

    /// Most recent events first; `limit` is clamped to `1..=recent_capacity`.
    pub async fn recent_messages(&self, limit: usize) -> StoreResult<Vec<Event>> {
        let limit = limit.clamp(1, self.recent_capacity);
        let raw = self.store.lrange(&self.keys.recent_messages(), limit).await?;
        Ok(decode_all(raw))
    }

    /// Most recent activity first, optionally only events strictly newer
    /// than `since`.  `limit` is clamped to `1..=activity_max_limit`.
    pub async fn activity_log(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<Event>> {
        let limit = limit.clamp(1, self.activity_max_limit);
        let raw = self
            .store
            .lrange(&self.keys.activity_log(), self.activity_capacity)
            .await?;
        Ok(decode_all(raw)
            .into_iter()
            .filter(|e| since.map_or(true, |s| e.timestamp > s))
            .take(limit)
            .collect())
    }

    /// Subscribe to the shared channel and forward envelopes from other
    /// instances to local connections until `cancel` fires.  The
    /// subscription is made before returning so startup fails fast when
    /// the store cannot subscribe.
    pub async fn spawn_relay(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> StoreResult<JoinHandle<()>> {
        let mut sub = self.store.subscribe(&self.channel).await?;
        tracing::info!(channel = %self.channel, origin = %self.origin, "event relay subscribed");

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = sub.recv() => {
                        let Some(payload) = next else {
                            tracing::info!("event channel closed, relay stopping");
                            break;
                        };
                        self.relay_one(&payload);
                    }
                }
            }
            tracing::debug!("event relay stopped");
        }))
    }

    /// Forward one pub/sub payload if it came from another instance.
    /// Returns `true` when it was forwarded.
    pub(crate) fn relay_one(&self, payload: &str) -> bool {
        let envelope: PubSubEnvelope = match serde_json::from_str(payload) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring undecodable pub/sub payload");
                return false;
            }
        };
        if envelope.origin == self.origin {
            return false;
        }
        let report = self.hub.fan_out(&OutboundMessage::Event(envelope.event));
        tracing::debug!(
            origin = %envelope.origin,
            delivered = report.delivered,
            "relayed remote event"
        );
        true
    }
}

fn decode_all(raw: Vec<String>) -> Vec<Event> {
    raw.into_iter()
        .filter_map(|s| match serde_json::from_str(&s) {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable log entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use leitl_store::{MemoryStore, StoreError, Subscription};

    use super::*;

    /// Delegates to a [`MemoryStore`] except that every publish fails.
    struct PublishFails(MemoryStore);

    #[async_trait]
    impl SharedStore for PublishFails {
        async fn ping(&self) -> StoreResult<()> {
            self.0.ping().await
        }
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
            self.0.set(key, value, ttl).await
        }
        async fn set_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<bool> {
            self.0.set_nx(key, value, ttl).await
        }
        async fn exists(&self, key: &str) -> StoreResult<bool> {
            self.0.exists(key).await
        }
        async fn del(&self, key: &str) -> StoreResult<bool> {
            self.0.del(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
            self.0.expire(key, ttl).await
        }
        async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
            self.0.sadd(key, member).await
        }
        async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
            self.0.srem(key, member).await
        }
        async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
            self.0.smembers(key).await
        }
        async fn lpush(&self, key: &str, value: String) -> StoreResult<usize> {
            self.0.lpush(key, value).await
        }
        async fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()> {
            self.0.ltrim(key, keep).await
        }
        async fn lrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
            self.0.lrange(key, limit).await
        }
        async fn publish(&self, _channel: &str, _payload: String) -> StoreResult<usize> {
            Err(StoreError::Unavailable("pub/sub link down".into()))
        }
        async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
            self.0.subscribe(channel).await
        }
    }

    fn bus_with(cfg: EventsConfig) -> (Arc<MemoryStore>, Arc<ConnectionHub>, Arc<EventBus>) {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(ConnectionHub::new());
        let bus = Arc::new(EventBus::new(
            store.clone(),
            hub.clone(),
            "coord-a".into(),
            &StoreConfig::default(),
            &cfg,
        ));
        (store, hub, bus)
    }

    fn bus() -> (Arc<MemoryStore>, Arc<ConnectionHub>, Arc<EventBus>) {
        bus_with(EventsConfig::default())
    }

    #[tokio::test]
    async fn broadcast_then_recent_returns_it_first() {
        let (_, _, bus) = bus();
        bus.broadcast("a", "s1", EventData::new()).await;
        let ev = bus.broadcast("b", "s1", EventData::new()).await;

        let recent = bus.recent_messages(1).await.unwrap();
        assert_eq!(recent, vec![ev]);
    }

    #[tokio::test]
    async fn logs_stay_within_capacity() {
        let (_, _, bus) = bus_with(EventsConfig {
            recent_capacity: 5,
            activity_capacity: 8,
            ..EventsConfig::default()
        });
        for i in 0..20 {
            bus.broadcast(&format!("e{i}"), "s1", EventData::new()).await;
        }
        let recent = bus.recent_messages(100).await.unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].event_type, "e19");

        let activity = bus.activity_log(None, 200).await.unwrap();
        assert_eq!(activity.len(), 8);
        assert_eq!(activity[7].event_type, "e12");
    }

    #[tokio::test]
    async fn activity_since_keeps_strictly_newer() {
        let (_, _, bus) = bus();
        let first = bus.broadcast("first", "s1", EventData::new()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        bus.broadcast("second", "s1", EventData::new()).await;

        let newer = bus.activity_log(Some(first.timestamp), 50).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].event_type, "second");
    }

    #[tokio::test]
    async fn activity_limit_is_clamped() {
        let (_, _, bus) = bus();
        for _ in 0..3 {
            bus.broadcast("x", "s1", EventData::new()).await;
        }
        assert_eq!(bus.activity_log(None, 0).await.unwrap().len(), 1);
        assert_eq!(bus.activity_log(None, 10_000).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection_in_order() {
        let (_, hub, bus) = bus();
        let (tx1, mut rx1) = mpsc::channel(16);
        let (tx2, mut rx2) = mpsc::channel(16);
        hub.register("s1", Arc::new(tx1));
        hub.register("s2", Arc::new(tx2));

        for kind in ["one", "two", "three"] {
            bus.broadcast(kind, "s1", EventData::new()).await;
        }

        for rx in [&mut rx1, &mut rx2] {
            let kinds: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
                .filter_map(|m| match m {
                    OutboundMessage::Event(e) => Some(e.event_type),
                    _ => None,
                })
                .collect();
            assert_eq!(kinds, vec!["one", "two", "three"]);
        }
    }

    #[tokio::test]
    async fn closed_store_does_not_block_local_delivery() {
        let (store, hub, bus) = bus();
        let (tx, mut rx) = mpsc::channel(4);
        hub.register("s1", Arc::new(tx));
        store.close();

        bus.broadcast("still.delivered", "s1", EventData::new()).await;
        assert!(matches!(rx.try_recv(), Ok(OutboundMessage::Event(_))));
    }

    #[tokio::test]
    async fn publish_failure_still_updates_logs_and_local_connections() {
        let store: Arc<dyn SharedStore> = Arc::new(PublishFails(MemoryStore::new()));
        let hub = Arc::new(ConnectionHub::new());
        let bus = EventBus::new(
            store,
            hub.clone(),
            "coord-a".into(),
            &StoreConfig::default(),
            &EventsConfig::default(),
        );
        let (tx, mut rx) = mpsc::channel(4);
        hub.register("s1", Arc::new(tx));

        let ev = bus.broadcast("task.done", "s1", EventData::new()).await;

        assert_eq!(bus.recent_messages(1).await.unwrap(), vec![ev.clone()]);
        assert_eq!(bus.activity_log(None, 10).await.unwrap(), vec![ev]);
        assert!(matches!(rx.try_recv(), Ok(OutboundMessage::Event(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_log_expires_unless_refreshed() {
        let (_, _, bus) = bus();
        let ttl = EventsConfig::default().activity_ttl();
        let hour = Duration::from_secs(3600);

        bus.broadcast("first", "s1", EventData::new()).await;
        tokio::time::advance(ttl - hour).await;

        // A push inside the window renews the TTL for the whole log.
        bus.broadcast("second", "s1", EventData::new()).await;
        tokio::time::advance(2 * hour).await;
        assert_eq!(bus.activity_log(None, 10).await.unwrap().len(), 2);

        tokio::time::advance(ttl).await;
        assert!(bus.activity_log(None, 10).await.unwrap().is_empty());
        // The recent log has no TTL.
        assert_eq!(bus.recent_messages(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn relay_skips_own_origin() {
        let (_, hub, bus) = bus();
        let (tx, mut rx) = mpsc::channel(4);
        hub.register("s1", Arc::new(tx));

        let own = PubSubEnvelope {
            origin: "coord-a".into(),
            event: Event::new("mine", "s1", EventData::new()),
        };
        let other = PubSubEnvelope {
            origin: "coord-b".into(),
            event: Event::new("theirs", "s9", EventData::new()),
        };
        assert!(!bus.relay_one(&serde_json::to_string(&own).unwrap()));
        assert!(bus.relay_one(&serde_json::to_string(&other).unwrap()));
        assert!(!bus.relay_one("not json"));

        match rx.try_recv() {
            Ok(OutboundMessage::Event(e)) => assert_eq!(e.event_type, "theirs"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn relay_task_forwards_remote_publishes_and_stops_on_cancel() {
        let (store, hub, bus) = bus();
        let (tx, mut rx) = mpsc::channel(4);
        hub.register("s1", Arc::new(tx));

        let cancel = CancellationToken::new();
        let handle = bus.clone().spawn_relay(cancel.clone()).await.unwrap();

        let remote = PubSubEnvelope {
            origin: "coord-b".into(),
            event: Event::new("remote.thing", "s2", EventData::new()),
        };
        store
            .publish("leitl:events", serde_json::to_string(&remote).unwrap())
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(got, OutboundMessage::Event(e) if e.event_type == "remote.thing"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
