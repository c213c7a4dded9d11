//! Session registry: the sole writer of session records and the active
//! index in the shared store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use leitl_domain::config::{SessionsConfig, StoreConfig};
use leitl_domain::trace::TraceEvent;
use leitl_domain::{Error, Result};
use leitl_protocol::{EventData, Session, SessionStatus, SESSION_ENDED, SESSION_HEARTBEAT, SESSION_STARTED};
use leitl_store::SharedStore;

use super::events::EventBus;
use super::hub::{ConnectionHub, ConnectionId, EventSink};
use super::session_lock::SessionLockMap;
use super::Keys;

/// Attempts at drawing an unused session id before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

/// Registration input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub agent_name: String,
    pub agent_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatOutcome {
    Refreshed(Session),
    /// Expired, ended, or never registered.
    UnknownSession,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    Ended { session: Session, uptime_secs: i64 },
    AlreadyEnded,
}

pub struct SessionRegistry {
    store: Arc<dyn SharedStore>,
    events: Arc<EventBus>,
    hub: Arc<ConnectionHub>,
    locks: SessionLockMap,
    keys: Keys,
    session_ttl: Duration,
    tombstone_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SharedStore>,
        events: Arc<EventBus>,
        hub: Arc<ConnectionHub>,
        store_cfg: &StoreConfig,
        cfg: &SessionsConfig,
    ) -> Self {
        Self {
            store,
            events,
            hub,
            locks: SessionLockMap::new(),
            keys: Keys::new(&store_cfg.key_prefix),
            session_ttl: cfg.session_ttl(),
            tombstone_ttl: cfg.tombstone_ttl(),
        }
    }

    /// Create a session with a fresh id and announce it.  The session is
    /// in the active index before this returns.
    pub async fn register(&self, req: RegisterRequest) -> Result<Session> {
        let agent_name = req.agent_name.trim();
        if agent_name.is_empty() {
            return Err(Error::InvalidRequest("agent_name must not be empty".into()));
        }

        let now = Utc::now();
        let mut session = Session {
            session_id: String::new(),
            agent_name: agent_name.to_owned(),
            agent_type: req.agent_type.trim().to_owned(),
            tags: req
                .tags
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect::<BTreeSet<_>>(),
            started_at: now,
            last_heartbeat: now,
            status: SessionStatus::Active,
            current_task: None,
            context_sources: req.context_sources,
        };

        let mut written = false;
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = format!("leitl-{}", uuid::Uuid::new_v4().simple());
            if self.store.exists(&self.keys.tombstone(&candidate)).await? {
                continue;
            }
            session.session_id = candidate;
            let record = serde_json::to_string(&session)?;
            if self
                .store
                .set_nx(&self.keys.session(&session.session_id), record, Some(self.session_ttl))
                .await?
            {
                written = true;
                break;
            }
        }
        if !written {
            return Err(Error::Other("could not allocate a unique session id".into()));
        }

        self.store
            .sadd(&self.keys.active_index(), &session.session_id)
            .await?;

        TraceEvent::SessionStarted {
            session_id: session.session_id.clone(),
            agent_name: session.agent_name.clone(),
            agent_type: session.agent_type.clone(),
        }
        .emit();

        self.events
            .broadcast(
                SESSION_STARTED,
                &session.session_id,
                event_data(json!({
                    "agent_name": session.agent_name,
                    "agent_type": session.agent_type,
                    "tags": session.tags,
                })),
            )
            .await;

        Ok(session)
    }

    /// Record liveness.  Unknown ids are a normal outcome, not an error:
    /// heartbeats race with expiry.
    pub async fn heartbeat(
        &self,
        session_id: &str,
        current_task: Option<String>,
    ) -> Result<HeartbeatOutcome> {
        let _guard = self.locks.acquire(session_id).await;

        let Some(mut session) = self.load(session_id).await? else {
            tracing::debug!(session_id, "heartbeat for unknown session ignored");
            return Ok(HeartbeatOutcome::UnknownSession);
        };

        session.last_heartbeat = Utc::now().max(session.started_at);
        if current_task.is_some() {
            session.current_task = current_task;
        }

        let record = serde_json::to_string(&session)?;
        self.store
            .set(&self.keys.session(session_id), record, Some(self.session_ttl))
            .await?;

        self.events
            .broadcast(
                SESSION_HEARTBEAT,
                session_id,
                event_data(json!({ "current_task": session.current_task })),
            )
            .await;

        Ok(HeartbeatOutcome::Refreshed(session))
    }

    /// End a session.  Ending an unknown or already-ended session is a
    /// no-op.  All live connections of the session are dropped.
    pub async fn end(&self, session_id: &str, reason: &str) -> Result<EndOutcome> {
        let guard = self.locks.acquire(session_id).await;

        let index = self.keys.active_index();
        let Some(mut session) = self.load(session_id).await? else {
            self.store.srem(&index, session_id).await?;
            return Ok(EndOutcome::AlreadyEnded);
        };

        self.store.srem(&index, session_id).await?;
        self.store.del(&self.keys.session(session_id)).await?;
        self.store
            .set(
                &self.keys.tombstone(session_id),
                Utc::now().to_rfc3339(),
                Some(self.tombstone_ttl),
            )
            .await?;

        let uptime_secs = session.uptime_secs(Utc::now());
        session.status = SessionStatus::Ended;

        self.events
            .broadcast(
                SESSION_ENDED,
                session_id,
                event_data(json!({
                    "agent_name": session.agent_name,
                    "uptime_secs": uptime_secs,
                    "reason": reason,
                })),
            )
            .await;
        self.hub.drop_session(session_id);

        TraceEvent::SessionEnded {
            session_id: session_id.to_owned(),
            uptime_secs,
            reason: reason.to_owned(),
        }
        .emit();

        drop(guard);
        Ok(EndOutcome::Ended {
            session,
            uptime_secs,
        })
    }

    /// Register a live connection for an active session.  Holds the
    /// session lock, so a concurrent [`end`](Self::end) either sees and
    /// drops this connection or runs first and makes this return `None`.
    pub async fn attach(
        &self,
        session_id: &str,
        sink: Arc<dyn EventSink>,
    ) -> Result<Option<ConnectionId>> {
        let _guard = self.locks.acquire(session_id).await;
        if self.load(session_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.hub.register(session_id, sink)))
    }

    /// Every live session, oldest first.  Ids whose record has vanished
    /// are pruned from the index; unreadable records are skipped.
    pub async fn active_sessions(&self) -> Result<Vec<Session>> {
        let index = self.keys.active_index();
        let ids = self.store.smembers(&index).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get(&self.keys.session(&id)).await? {
                None => {
                    tracing::debug!(session_id = %id, "pruning index entry without record");
                    self.store.srem(&index, &id).await?;
                }
                Some(raw) => match serde_json::from_str::<Session>(&raw) {
                    Ok(s) => sessions.push(s),
                    Err(e) => tracing::warn!(session_id = %id, error = %e, "skipping unreadable session record"),
                },
            }
        }
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(sessions)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        self.load(session_id).await
    }

    /// Like [`get`](Self::get), but a missing session is [`Error::NotFound`].
    pub async fn require(&self, session_id: &str) -> Result<Session> {
        self.load(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }

    /// Release per-session locks nobody is using.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune_idle()
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        let Some(raw) = self.store.get(&self.keys.session(session_id)).await? else {
            return Ok(None);
        };
        let session: Session = serde_json::from_str(&raw)?;
        Ok((session.status == SessionStatus::Active).then_some(session))
    }
}

fn event_data(value: serde_json::Value) -> EventData {
    match value {
        serde_json::Value::Object(map) => map,
        _ => EventData::new(),
    }
}

#[cfg(test)]
mod tests {
    use leitl_domain::config::EventsConfig;
    use leitl_protocol::OutboundMessage;
    use leitl_store::MemoryStore;
    use tokio::sync::mpsc;

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: Arc<ConnectionHub>,
        events: Arc<EventBus>,
        registry: SessionRegistry,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(ConnectionHub::new());
        let store_cfg = StoreConfig::default();
        let events = Arc::new(EventBus::new(
            store.clone(),
            hub.clone(),
            "coord-test".into(),
            &store_cfg,
            &EventsConfig::default(),
        ));
        let registry = SessionRegistry::new(
            store.clone(),
            events.clone(),
            hub.clone(),
            &store_cfg,
            &SessionsConfig::default(),
        );
        Fixture {
            store,
            hub,
            events,
            registry,
        }
    }

    fn alice() -> RegisterRequest {
        RegisterRequest {
            agent_name: "Alice".into(),
            agent_type: "planner".into(),
            tags: vec!["b".into(), "a".into(), "b".into(), " ".into()],
            context_sources: vec![],
        }
    }

    #[tokio::test]
    async fn register_is_immediately_visible() {
        let f = fixture();
        let s = f.registry.register(alice()).await.unwrap();

        assert!(s.session_id.starts_with("leitl-"));
        assert_eq!(s.session_id.len(), "leitl-".len() + 32);
        assert_eq!(s.tags.iter().collect::<Vec<_>>(), vec!["a", "b"]);

        let active = f.registry.active_sessions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].agent_name, "Alice");

        let recent = f.events.recent_messages(1).await.unwrap();
        assert_eq!(recent[0].event_type, SESSION_STARTED);
        assert_eq!(recent[0].session_id, s.session_id);
    }

    #[tokio::test]
    async fn register_rejects_blank_name() {
        let f = fixture();
        let err = f
            .registry
            .register(RegisterRequest {
                agent_name: "  ".into(),
                ..RegisterRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn heartbeat_updates_task_and_keeps_order_invariant() {
        let f = fixture();
        let s = f.registry.register(alice()).await.unwrap();

        let out = f
            .registry
            .heartbeat(&s.session_id, Some("indexing".into()))
            .await
            .unwrap();
        let HeartbeatOutcome::Refreshed(updated) = out else {
            panic!("expected refresh");
        };
        assert_eq!(updated.current_task.as_deref(), Some("indexing"));
        assert!(updated.last_heartbeat >= updated.started_at);

        // A bare heartbeat keeps the last reported task.
        let HeartbeatOutcome::Refreshed(again) =
            f.registry.heartbeat(&s.session_id, None).await.unwrap()
        else {
            panic!("expected refresh");
        };
        assert_eq!(again.current_task.as_deref(), Some("indexing"));

        let recent = f.events.recent_messages(1).await.unwrap();
        assert_eq!(recent[0].event_type, SESSION_HEARTBEAT);
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_session_is_benign() {
        let f = fixture();
        assert_eq!(
            f.registry.heartbeat("leitl-missing", None).await.unwrap(),
            HeartbeatOutcome::UnknownSession
        );
    }

    #[tokio::test]
    async fn end_is_idempotent_and_announces_uptime() {
        let f = fixture();
        let s = f.registry.register(alice()).await.unwrap();

        let first = f.registry.end(&s.session_id, "client_request").await.unwrap();
        assert!(matches!(first, EndOutcome::Ended { uptime_secs, .. } if uptime_secs >= 0));
        assert_eq!(
            f.registry.end(&s.session_id, "client_request").await.unwrap(),
            EndOutcome::AlreadyEnded
        );

        assert!(f.registry.active_sessions().await.unwrap().is_empty());
        assert_eq!(f.registry.get(&s.session_id).await.unwrap(), None);

        let ended = &f.events.recent_messages(1).await.unwrap()[0];
        assert_eq!(ended.event_type, SESSION_ENDED);
        assert!(ended.data.contains_key("uptime_secs"));

        // Heartbeats after end do not resurrect the session.
        assert_eq!(
            f.registry.heartbeat(&s.session_id, None).await.unwrap(),
            HeartbeatOutcome::UnknownSession
        );
    }

    #[tokio::test]
    async fn end_drops_connections() {
        let f = fixture();
        let s = f.registry.register(alice()).await.unwrap();
        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(8);
        f.hub.register(&s.session_id, Arc::new(tx));

        f.registry.end(&s.session_id, "client_request").await.unwrap();
        assert_eq!(f.hub.connections_for(&s.session_id), 0);

        // The session.ended event arrives before the channel closes.
        let mut saw_end = false;
        while let Some(msg) = rx.recv().await {
            if let OutboundMessage::Event(e) = msg {
                saw_end |= e.event_type == SESSION_ENDED;
            }
        }
        assert!(saw_end);
    }

    #[tokio::test]
    async fn ended_ids_leave_a_tombstone() {
        let f = fixture();
        let s = f.registry.register(alice()).await.unwrap();
        f.registry.end(&s.session_id, "client_request").await.unwrap();

        let keys = Keys::new(&StoreConfig::default().key_prefix);
        assert!(f.store.exists(&keys.tombstone(&s.session_id)).await.unwrap());
    }

    #[tokio::test]
    async fn active_sessions_prunes_missing_records() {
        let f = fixture();
        let keep = f.registry.register(alice()).await.unwrap();
        let gone = f.registry.register(alice()).await.unwrap();

        let keys = Keys::new(&StoreConfig::default().key_prefix);
        f.store.del(&keys.session(&gone.session_id)).await.unwrap();
        f.store
            .sadd(&keys.active_index(), "leitl-garbage")
            .await
            .unwrap();
        f.store
            .set(&keys.session("leitl-garbage"), "{not json".into(), None)
            .await
            .unwrap();

        let active = f.registry.active_sessions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, keep.session_id);

        let index = f.store.smembers(&keys.active_index()).await.unwrap();
        assert!(!index.contains(&gone.session_id));
    }

    #[tokio::test(start_paused = true)]
    async fn record_expires_after_session_ttl() {
        let f = fixture();
        let s = f.registry.register(alice()).await.unwrap();

        tokio::time::advance(SessionsConfig::default().session_ttl() + Duration::from_secs(1)).await;
        assert_eq!(f.registry.get(&s.session_id).await.unwrap(), None);
        assert!(f.registry.active_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attach_refuses_ended_sessions() {
        let f = fixture();
        let s = f.registry.register(alice()).await.unwrap();
        f.registry.end(&s.session_id, "client_request").await.unwrap();

        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(8);
        let attached = f.registry.attach(&s.session_id, Arc::new(tx)).await.unwrap();
        assert_eq!(attached, None);
        assert_eq!(f.hub.connections_for(&s.session_id), 0);
        // The sink was dropped, so its receiver sees end-of-channel.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn attach_racing_end_never_leaves_a_connection() {
        for _ in 0..20 {
            let f = fixture();
            let s = f.registry.register(alice()).await.unwrap();
            let (tx, _rx) = mpsc::channel::<OutboundMessage>(64);

            let (attached, ended) = tokio::join!(
                f.registry.attach(&s.session_id, Arc::new(tx)),
                f.registry.end(&s.session_id, "client_request"),
            );
            attached.unwrap();
            ended.unwrap();
            assert_eq!(f.hub.connections_for(&s.session_id), 0);
        }
    }

    #[tokio::test]
    async fn require_reports_not_found() {
        let f = fixture();
        let s = f.registry.register(alice()).await.unwrap();
        assert_eq!(f.registry.require(&s.session_id).await.unwrap().session_id, s.session_id);

        let err = f.registry.require("leitl-missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_store_error() {
        let f = fixture();
        f.store.close();
        let err = f.registry.register(alice()).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }
}
