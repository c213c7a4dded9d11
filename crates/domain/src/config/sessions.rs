use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session liveness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session liveness rules.
///
/// `heartbeat_timeout_secs` and `session_ttl_secs` are deliberately
/// independent: the first drives the sweeper, the second is the absolute
/// expiry on the stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// A session with no heartbeat for longer than this is ended by the sweeper.
    #[serde(default = "d_60")]
    pub heartbeat_timeout_secs: u64,
    /// How often the sweeper scans the active index.
    #[serde(default = "d_30")]
    pub sweep_interval_secs: u64,
    /// Absolute TTL on each stored session record, refreshed by heartbeats.
    #[serde(default = "d_3600")]
    pub session_ttl_secs: u64,
    /// How long an ended session id stays reserved against reuse.
    #[serde(default = "d_3600")]
    pub tombstone_ttl_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
            sweep_interval_secs: 30,
            session_ttl_secs: 3600,
            tombstone_ttl_secs: 3600,
        }
    }
}

impl SessionsConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(self.tombstone_ttl_secs)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_60() -> u64 {
    60
}
fn d_30() -> u64 {
    30
}
fn d_3600() -> u64 {
    3600
}
