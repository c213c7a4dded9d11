use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Entries kept in the recent-messages log (no time expiry).
    #[serde(default = "d_100")]
    pub recent_capacity: usize,
    /// Entries kept in the activity log.
    #[serde(default = "d_1000")]
    pub activity_capacity: usize,
    /// TTL on the whole activity log, refreshed on every push.
    #[serde(default = "d_86400")]
    pub activity_ttl_secs: u64,
    /// Upper bound on `limit` for activity-log queries.
    #[serde(default = "d_200")]
    pub activity_max_limit: usize,
    /// Outbound queue depth per WebSocket connection.  A connection whose
    /// queue is full when an event arrives is dropped.
    #[serde(default = "d_256")]
    pub connection_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            recent_capacity: 100,
            activity_capacity: 1000,
            activity_ttl_secs: 86_400,
            activity_max_limit: 200,
            connection_buffer: 256,
        }
    }
}

impl EventsConfig {
    pub fn activity_ttl(&self) -> Duration {
        Duration::from_secs(self.activity_ttl_secs)
    }
}

fn d_100() -> usize {
    100
}
fn d_1000() -> usize {
    1000
}
fn d_86400() -> u64 {
    86_400
}
fn d_200() -> usize {
    200
}
fn d_256() -> usize {
    256
}
