//! In-memory map of live connections per session, and event fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use leitl_protocol::OutboundMessage;

pub type ConnectionId = u64;

/// Why a sink refused a message.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The transport went away.
    #[error("connection closed")]
    Closed,
    /// The transport is not keeping up; its buffer is full.
    #[error("connection buffer full")]
    Full,
}

/// A destination for outbound messages.  Delivery must not block.
pub trait EventSink: Send + Sync {
    fn try_deliver(&self, msg: OutboundMessage) -> Result<(), SinkError>;
}

impl EventSink for mpsc::Sender<OutboundMessage> {
    fn try_deliver(&self, msg: OutboundMessage) -> Result<(), SinkError> {
        self.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

struct Connection {
    id: ConnectionId,
    sink: Arc<dyn EventSink>,
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    /// Connections that failed and were unregistered.
    pub dropped: usize,
}

/// Thread-safe registry of live connections, keyed by session.
pub struct ConnectionHub {
    sessions: RwLock<HashMap<String, Vec<Connection>>>,
    next_id: AtomicU64,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a connection for `session_id`.  A session may hold any number
    /// of connections.
    pub fn register(&self, session_id: &str, sink: Arc<dyn EventSink>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.write();
        let conns = sessions.entry(session_id.to_owned()).or_default();
        conns.push(Connection { id, sink });
        tracing::debug!(session_id, connection_id = id, open = conns.len(), "connection registered");
        id
    }

    /// Remove one connection.  Returns `false` if it was already gone.
    pub fn unregister(&self, session_id: &str, id: ConnectionId) -> bool {
        let mut sessions = self.sessions.write();
        let Some(conns) = sessions.get_mut(session_id) else {
            return false;
        };
        let before = conns.len();
        conns.retain(|c| c.id != id);
        let removed = conns.len() < before;
        if conns.is_empty() {
            sessions.remove(session_id);
        }
        removed
    }

    /// Remove every connection of a session.  Dropping the sinks closes
    /// the underlying transports.
    pub fn drop_session(&self, session_id: &str) -> usize {
        let dropped = self
            .sessions
            .write()
            .remove(session_id)
            .map(|c| c.len())
            .unwrap_or(0);
        if dropped > 0 {
            tracing::info!(session_id, dropped, "dropped session connections");
        }
        dropped
    }

    /// Deliver to a single connection.  A failing sink is unregistered.
    pub fn send_to(&self, session_id: &str, id: ConnectionId, msg: OutboundMessage) -> bool {
        let sink = {
            let sessions = self.sessions.read();
            sessions
                .get(session_id)
                .and_then(|conns| conns.iter().find(|c| c.id == id))
                .map(|c| c.sink.clone())
        };
        let Some(sink) = sink else {
            return false;
        };
        match sink.try_deliver(msg) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(session_id, connection_id = id, error = ?e, "direct send failed");
                self.unregister(session_id, id);
                false
            }
        }
    }

    /// Deliver `msg` to every connection of every session.  Sinks are
    /// snapshotted first so no lock is held while delivering.
    pub fn fan_out(&self, msg: &OutboundMessage) -> FanOutReport {
        let targets: Vec<(String, ConnectionId, Arc<dyn EventSink>)> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .flat_map(|(sid, conns)| {
                    conns.iter().map(move |c| (sid.clone(), c.id, c.sink.clone()))
                })
                .collect()
        };

        let mut report = FanOutReport::default();
        let mut failed = Vec::new();
        for (sid, id, sink) in targets {
            match sink.try_deliver(msg.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(session_id = %sid, connection_id = id, error = %e, "dropping connection after failed delivery");
                    failed.push((sid, id));
                }
            }
        }

        for (sid, id) in &failed {
            if self.unregister(sid, *id) {
                report.dropped += 1;
            }
        }
        report
    }

    /// Total open connections.
    pub fn connection_count(&self) -> usize {
        self.sessions.read().values().map(Vec::len).sum()
    }

    /// Sessions with at least one open connection.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn connections_for(&self, session_id: &str) -> usize {
        self.sessions.read().get(session_id).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use leitl_protocol::{Event, EventData};

    use super::*;

    fn event(kind: &str) -> OutboundMessage {
        OutboundMessage::Event(Event::new(kind, "leitl-origin", EventData::new()))
    }

    fn channel(cap: usize) -> (Arc<dyn EventSink>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(cap);
        (Arc::new(tx), rx)
    }

    #[test]
    fn fan_out_reaches_every_session() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = channel(4);
        let (b, mut rx_b) = channel(4);
        hub.register("s1", a);
        hub.register("s2", b);

        let report = hub.fan_out(&event("x"));
        assert_eq!(report, FanOutReport { delivered: 2, dropped: 0 });
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn two_connections_one_session_survive_each_other() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = channel(4);
        let (b, rx_b) = channel(4);
        hub.register("s1", a);
        hub.register("s1", b);
        assert_eq!(hub.connections_for("s1"), 2);

        hub.fan_out(&event("first"));
        drop(rx_b);

        let report = hub.fan_out(&event("second"));
        assert_eq!(report, FanOutReport { delivered: 1, dropped: 1 });
        assert_eq!(hub.connections_for("s1"), 1);

        let kinds: Vec<String> = std::iter::from_fn(|| rx_a.try_recv().ok())
            .map(|m| match m {
                OutboundMessage::Event(e) => e.event_type,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(kinds, vec!["first", "second"]);
    }

    #[test]
    fn full_sink_is_dropped_without_blocking() {
        let hub = ConnectionHub::new();
        let (slow, _rx_slow) = channel(1);
        let (fast, mut rx_fast) = channel(8);
        hub.register("slow", slow);
        hub.register("fast", fast);

        hub.fan_out(&event("one"));
        let report = hub.fan_out(&event("two"));
        assert_eq!(report.dropped, 1);
        assert_eq!(hub.connections_for("slow"), 0);
        assert_eq!(std::iter::from_fn(|| rx_fast.try_recv().ok()).count(), 2);
    }

    #[test]
    fn unregister_and_drop_session() {
        let hub = ConnectionHub::new();
        let (a, _ra) = channel(1);
        let (b, _rb) = channel(1);
        let id_a = hub.register("s1", a);
        hub.register("s1", b);

        assert!(hub.unregister("s1", id_a));
        assert!(!hub.unregister("s1", id_a));
        assert_eq!(hub.connection_count(), 1);

        assert_eq!(hub.drop_session("s1"), 1);
        assert_eq!(hub.drop_session("s1"), 0);
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn drop_session_closes_receivers() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(1);
        hub.register("s1", Arc::new(tx));
        hub.drop_session("s1");
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn send_to_targets_one_connection() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = channel(2);
        let (b, mut rx_b) = channel(2);
        let id_a = hub.register("s1", a);
        hub.register("s1", b);

        assert!(hub.send_to("s1", id_a, event("direct")));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert!(!hub.send_to("s1", 9999, event("nobody")));
    }
}
