use serde::Serialize;

/// Structured trace events emitted across all LEITL crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionStarted {
        session_id: String,
        agent_name: String,
        agent_type: String,
    },
    SessionEnded {
        session_id: String,
        uptime_secs: i64,
        reason: String,
    },
    SweepCompleted {
        scanned: usize,
        expired: usize,
        duration_ms: u64,
    },
    EventBroadcast {
        event_type: String,
        session_id: String,
        delivered: usize,
        dropped: usize,
    },
    ConnectionOpened {
        session_id: String,
        connection_id: u64,
    },
    ConnectionClosed {
        session_id: String,
        connection_id: u64,
    },
    ContextSynced {
        source_url: String,
        cache_hit: bool,
        total_matches: usize,
        fetch_failures: usize,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "leitl_event");
    }
}
